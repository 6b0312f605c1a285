//! Text utilities shared by the Dockerfile parser and the operation handlers.
//!
//! Pure functions: tokenization that respects quotes, quote trimming, and
//! shell-style path joining against a working directory.

/// Remove one layer of matching surrounding quotes (`"…"` or `'…'`).
pub fn trim_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && first == last {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Split on whitespace outside of quotes. Quote characters are kept in the token.
pub fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in s.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Split a line on `separator`, turn tabs into spaces, trim, and drop empty fragments.
pub fn split_fragments(line: &str, separator: &str) -> Vec<String> {
    line.split(separator)
        .map(|fragment| fragment.replace('\t', " ").trim().to_string())
        .filter(|fragment| !fragment.is_empty())
        .collect()
}

/// Resolve `path` against `workdir` unless it is already absolute.
pub fn join_path(workdir: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", workdir.trim_end_matches('/'), path)
    }
}

/// Last `/`-separated segment of a URL or path, as written.
pub fn last_segment(s: &str) -> &str {
    s.rsplit('/').next().unwrap_or(s)
}

/// File name of a path, ignoring trailing slashes.
pub fn basename(path: &str) -> &str {
    last_segment(path.trim_end_matches('/'))
}

/// Lexically resolve `.` and `..` components of an absolute path.
///
/// Relative inputs (such as `~/src`) are returned unchanged.
pub fn normalize_path(path: &str) -> String {
    if !path.starts_with('/') {
        return path.to_string();
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Whether a token looks like a command-line flag.
pub fn is_flag(token: &str) -> bool {
    token.starts_with('-') && token.len() > 1
}
