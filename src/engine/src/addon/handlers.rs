//! Shell operation handlers.
//!
//! Each recognized verb has one handler that turns the tokens of a single
//! sub-command into a [`Trace`]. Handlers never fabricate a source: when none
//! can be found they return `None` and the sub-command is ignored.

use std::collections::HashMap;

use addontrace_core::Trace;

use super::scope::{substitute, VariableScope};
use super::text::{is_flag, join_path, last_segment, normalize_path};
use super::verb::Verb;

/// State a handler may read while interpreting a sub-command.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    /// Current directory of the command set
    pub workdir: &'a str,
    pub scope: &'a VariableScope,
    /// URL of the latest `git clone` in the command set
    pub clone_url: Option<&'a str>,
}

/// What a sub-command contributes to the install being assembled.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A fetch step. `origin` is `None` when the step refines the current
    /// origin instead of replacing it (`git checkout`).
    Fetch {
        origin: Option<String>,
        trace: Trace,
    },
    /// A follow-up step that must be correlated with earlier destinations
    Step(Trace),
    /// The command set's current directory changes
    ChangeDir(String),
}

/// Interprets the tokens of one sub-command.
pub trait OperationHandler: Send + Sync {
    /// Tokens are already substituted; `tokens[0]` is the command name.
    fn handle(&self, tokens: &[String], ctx: &HandlerContext<'_>) -> Option<Outcome>;
}

/// Handlers keyed by verb.
pub struct HandlerRegistry {
    handlers: HashMap<Verb, Box<dyn OperationHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register (or replace) the handler for `verb`.
    pub fn register(&mut self, verb: Verb, handler: Box<dyn OperationHandler>) {
        self.handlers.insert(verb, handler);
    }

    /// Classify `tokens`, substitute variables and run the matching handler.
    pub fn dispatch(&self, tokens: &[String], ctx: &HandlerContext<'_>) -> Option<Outcome> {
        let tokens: Vec<String> = tokens.iter().map(|t| substitute(t, ctx.scope)).collect();
        let verb = Verb::classify(&tokens)?;
        let handler = self.handlers.get(&verb)?;
        handler.handle(&tokens, ctx)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Verb::Curl, Box::new(CurlHandler));
        registry.register(Verb::Wget, Box::new(WgetHandler));
        registry.register(Verb::GitClone, Box::new(GitCloneHandler));
        registry.register(Verb::GitCheckout, Box::new(GitCheckoutHandler));
        registry.register(Verb::Tar, Box::new(TarHandler));
        registry.register(Verb::Unzip, Box::new(UnzipHandler));
        registry.register(Verb::Cp, Box::new(RelocateHandler(Verb::Cp)));
        registry.register(Verb::Mv, Box::new(RelocateHandler(Verb::Mv)));
        registry.register(Verb::Cd, Box::new(CdHandler));
        registry
    }
}

/// Value of a short option cluster such as `-sSLo`: true when `letter` is
/// the last letter, meaning the next token is its argument.
fn cluster_ends_with(token: &str, letter: char) -> bool {
    is_flag(token) && !token.starts_with("--") && token.ends_with(letter)
}

fn first_url<'t>(tokens: &'t [String], schemes: &[&str]) -> Option<&'t String> {
    tokens
        .iter()
        .find(|t| schemes.iter().any(|scheme| t.starts_with(scheme)))
}

// --- fetch handlers ---

/// `curl [opts] <url> [-o <file> | --output <file> | > <file>]`
pub struct CurlHandler;

impl OperationHandler for CurlHandler {
    fn handle(&self, tokens: &[String], ctx: &HandlerContext<'_>) -> Option<Outcome> {
        let url = first_url(tokens, &["http"])?.clone();

        let mut output: Option<&str> = None;
        let mut iter = tokens.iter().skip(1);
        while let Some(token) = iter.next() {
            if let Some(value) = token.strip_prefix("--output=") {
                output = Some(value);
            } else if token == "--output" || token == ">" || cluster_ends_with(token, 'o') {
                if let Some(next) = iter.next() {
                    output = Some(next);
                }
            } else if let Some(value) = token.strip_prefix('>').filter(|v| !v.is_empty()) {
                output = Some(value);
            }
        }

        let mut trace = Trace::new(Verb::Curl.label(), ctx.workdir);
        trace.source = url.clone();
        if let Some(output) = output {
            trace.destination = join_path(ctx.workdir, output);
        }
        Some(Outcome::Fetch {
            origin: Some(url),
            trace,
        })
    }
}

/// `wget [opts] <url> [-O <file>] [-P <dir>]`
pub struct WgetHandler;

impl OperationHandler for WgetHandler {
    fn handle(&self, tokens: &[String], ctx: &HandlerContext<'_>) -> Option<Outcome> {
        let url = first_url(tokens, &["http"])?.clone();

        let mut document: Option<&str> = None;
        let mut prefix: Option<&str> = None;
        let mut iter = tokens.iter().skip(1);
        while let Some(token) = iter.next() {
            if let Some(value) = token.strip_prefix("--output-document=") {
                document = Some(value);
            } else if let Some(value) = token.strip_prefix("--directory-prefix=") {
                prefix = Some(value);
            } else if token == "--output-document" || cluster_ends_with(token, 'O') {
                document = iter.next().map(String::as_str);
            } else if token == "--directory-prefix" || token == "-P" {
                prefix = iter.next().map(String::as_str);
            }
        }

        let destination = match document {
            Some("-") => ctx.workdir.to_string(),
            Some(file) => join_path(ctx.workdir, file),
            None => {
                let dir = prefix
                    .map(|p| join_path(ctx.workdir, p))
                    .unwrap_or_else(|| ctx.workdir.to_string());
                format!("{}/{}", dir.trim_end_matches('/'), last_segment(&url))
            }
        };

        let mut trace = Trace::new(Verb::Wget.label(), ctx.workdir);
        trace.source = url.clone();
        trace.destination = destination;
        Some(Outcome::Fetch {
            origin: Some(url),
            trace,
        })
    }
}

/// Options of `git clone` that consume the following token.
const GIT_CLONE_VALUE_OPTIONS: &[&str] = &[
    "-c",
    "--config",
    "--depth",
    "-j",
    "--jobs",
    "-o",
    "--origin",
    "--reference",
    "--separate-git-dir",
    "--template",
    "-u",
    "--upload-pack",
];

/// `git clone [-b <branch>] <url> [<dir>]`
pub struct GitCloneHandler;

impl OperationHandler for GitCloneHandler {
    fn handle(&self, tokens: &[String], ctx: &HandlerContext<'_>) -> Option<Outcome> {
        let mut url: Option<&str> = None;
        let mut directory: Option<&str> = None;
        let mut branch: Option<&str> = None;

        let mut iter = tokens.iter().skip(2);
        while let Some(token) = iter.next() {
            if token == "-b" || token == "--branch" {
                branch = iter.next().map(String::as_str);
            } else if let Some(value) = token.strip_prefix("--branch=") {
                branch = Some(value);
            } else if GIT_CLONE_VALUE_OPTIONS.contains(&token.as_str()) {
                iter.next();
            } else if is_flag(token) {
                continue;
            } else if url.is_none() {
                if ["ssh://", "https://", "http://"]
                    .iter()
                    .any(|scheme| token.starts_with(scheme))
                {
                    url = Some(token);
                }
            } else if directory.is_none() {
                directory = Some(token);
            }
        }

        let url = url?.to_string();
        let name = match directory {
            Some(dir) => dir.to_string(),
            None => {
                let segment = last_segment(url.trim_end_matches('/'));
                segment.strip_suffix(".git").unwrap_or(segment).to_string()
            }
        };

        let mut label = Verb::GitClone.label().to_string();
        if let Some(branch) = branch {
            label.push_str(" -b ");
            label.push_str(branch);
        }

        let mut trace = Trace::new(label, ctx.workdir);
        trace.source = url.clone();
        trace.destination = join_path(ctx.workdir, &name);
        Some(Outcome::Fetch {
            origin: Some(url),
            trace,
        })
    }
}

/// `git checkout <ref>`; other forms are not interpreted.
pub struct GitCheckoutHandler;

impl OperationHandler for GitCheckoutHandler {
    fn handle(&self, tokens: &[String], ctx: &HandlerContext<'_>) -> Option<Outcome> {
        match tokens {
            [_, _, reference] if !is_flag(reference) => {
                let mut trace = Trace::new(Verb::GitCheckout.label(), ctx.workdir);
                trace.source = reference.clone();
                trace.link = ctx.clone_url.map(String::from);
                Some(Outcome::Fetch {
                    origin: None,
                    trace,
                })
            }
            _ => None,
        }
    }
}

// --- follow-up handlers ---

/// `tar` extraction: `-xzf <file>`, `-f <file>`, `--file=<file>`, `-C <dir>`,
/// `--directory <dir>`, `-xJC <dir>`, `-xfC <dir> <file>`.
pub struct TarHandler;

impl OperationHandler for TarHandler {
    fn handle(&self, tokens: &[String], ctx: &HandlerContext<'_>) -> Option<Outcome> {
        let mut label = Verb::Tar.label().to_string();
        let mut source: Option<&str> = None;
        let mut directory: Option<&str> = None;

        let mut iter = tokens.iter().skip(1);
        while let Some(token) = iter.next() {
            if token == "-C" || token == "--directory" {
                directory = iter.next().map(String::as_str);
            } else if let Some(value) = token.strip_prefix("--directory=") {
                directory = Some(value);
            } else if token == "-f" || token == "--file" {
                source = iter.next().map(String::as_str);
            } else if let Some(value) = token.strip_prefix("--file=") {
                source = Some(value);
            } else if token.starts_with("--") {
                continue;
            } else if token.ends_with('C') && token.starts_with('-') {
                // -xJC <dir>, -xfC <dir> <file>
                label = format!("{} {}", Verb::Tar.label(), token);
                directory = iter.next().map(String::as_str);
                if token.contains('f') {
                    source = iter.next().map(String::as_str);
                }
            } else if token.contains('x') && token.contains('f') {
                label = format!("{} {}", Verb::Tar.label(), token);
                source = iter.next().map(String::as_str);
            }
        }

        let source = source.filter(|s| !s.is_empty())?;
        let mut trace = Trace::new(label, ctx.workdir);
        trace.source = join_path(ctx.workdir, source);
        if let Some(dir) = directory {
            trace.destination = join_path(ctx.workdir, dir);
        }
        Some(Outcome::Step(trace))
    }
}

/// `unzip [-P <pw>] <file> [-d <dir>]`
pub struct UnzipHandler;

impl OperationHandler for UnzipHandler {
    fn handle(&self, tokens: &[String], ctx: &HandlerContext<'_>) -> Option<Outcome> {
        let mut source: Option<&str> = None;
        let mut directory: Option<&str> = None;

        let mut iter = tokens.iter().skip(1);
        while let Some(token) = iter.next() {
            if token == "-d" {
                directory = iter.next().map(String::as_str);
            } else if token == "-P" || token == "-x" {
                iter.next();
            } else if !token.starts_with('-') && source.is_none() {
                source = Some(token);
            }
        }

        let mut trace = Trace::new(Verb::Unzip.label(), ctx.workdir);
        trace.source = join_path(ctx.workdir, source?);
        if let Some(dir) = directory {
            trace.destination = join_path(ctx.workdir, dir);
        }
        Some(Outcome::Step(trace))
    }
}

/// `cp`/`mv`: the first positional followed by another argument is the
/// source, that argument the destination.
pub struct RelocateHandler(pub Verb);

impl OperationHandler for RelocateHandler {
    fn handle(&self, tokens: &[String], ctx: &HandlerContext<'_>) -> Option<Outcome> {
        let index = tokens
            .iter()
            .enumerate()
            .skip(1)
            .position(|(i, t)| !t.starts_with('-') && i + 1 < tokens.len())?
            + 1;

        let mut trace = Trace::new(self.0.label(), ctx.workdir);
        trace.source = join_path(ctx.workdir, &tokens[index]);
        trace.destination = join_path(ctx.workdir, &tokens[index + 1]);
        Some(Outcome::Step(trace))
    }
}

/// `cd <dir>`
pub struct CdHandler;

impl OperationHandler for CdHandler {
    fn handle(&self, tokens: &[String], ctx: &HandlerContext<'_>) -> Option<Outcome> {
        match tokens {
            [_, dir] if dir == "~" || dir.starts_with("~/") => Some(Outcome::ChangeDir(dir.clone())),
            [_, dir] => Some(Outcome::ChangeDir(normalize_path(&join_path(
                ctx.workdir,
                dir,
            )))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::text::split_words;

    fn run(command: &str, workdir: &str) -> Option<Outcome> {
        run_with(command, workdir, &VariableScope::default(), None)
    }

    fn run_with(
        command: &str,
        workdir: &str,
        scope: &VariableScope,
        clone_url: Option<&str>,
    ) -> Option<Outcome> {
        let ctx = HandlerContext {
            workdir,
            scope,
            clone_url,
        };
        HandlerRegistry::default().dispatch(&split_words(command), &ctx)
    }

    fn fetch(command: &str, workdir: &str) -> (Option<String>, Trace) {
        match run(command, workdir) {
            Some(Outcome::Fetch { origin, trace }) => (origin, trace),
            other => panic!("expected fetch, got {:?}", other),
        }
    }

    fn step(command: &str, workdir: &str) -> Trace {
        match run(command, workdir) {
            Some(Outcome::Step(trace)) => trace,
            other => panic!("expected step, got {:?}", other),
        }
    }

    // --- curl ---

    #[test]
    fn test_curl_output_flag() {
        let (origin, trace) = fetch("curl -sSL http://x/a.tgz -o a.tgz", "/opt/");
        assert_eq!(origin.as_deref(), Some("http://x/a.tgz"));
        assert_eq!(trace.source, "http://x/a.tgz");
        assert_eq!(trace.destination, "/opt/a.tgz");
        assert_eq!(trace.workdir, "/opt/");
        assert_eq!(trace.command, "curl");
    }

    #[test]
    fn test_curl_output_cluster_and_equals() {
        let (_, trace) = fetch("curl -fsSLo /tmp/a http://x/a", "/");
        assert_eq!(trace.destination, "/tmp/a");
        let (_, trace) = fetch("curl --output=/tmp/b http://x/b", "/");
        assert_eq!(trace.destination, "/tmp/b");
        let (_, trace) = fetch("curl http://x/c > c.bin", "/srv");
        assert_eq!(trace.destination, "/srv/c.bin");
    }

    #[test]
    fn test_curl_defaults_to_workdir() {
        let (_, trace) = fetch("curl -O http://x/y.tar.gz", "/build");
        assert_eq!(trace.destination, "/build");
    }

    #[test]
    fn test_curl_without_url() {
        assert!(run("curl -o out ftp://x/y", "/").is_none());
    }

    #[test]
    fn test_curl_substitutes_variables() {
        let scope = VariableScope::default().bind("VERSION", "1.2");
        let outcome = run_with("curl -o /tmp/t.tgz http://x/t-${VERSION}.tgz", "/", &scope, None);
        assert!(matches!(
            outcome,
            Some(Outcome::Fetch { origin: Some(ref o), .. }) if o == "http://x/t-1.2.tgz"
        ));
    }

    // --- wget ---

    #[test]
    fn test_wget_default_name() {
        let (_, trace) = fetch("wget http://host/path/file-1.0.tgz", "/opt");
        assert_eq!(trace.destination, "/opt/file-1.0.tgz");
    }

    #[test]
    fn test_wget_prefix() {
        let (_, trace) = fetch("wget http://example.com/tool.tar.gz -P /tmp", "/");
        assert_eq!(trace.destination, "/tmp/tool.tar.gz");
        let (_, trace) = fetch("wget -P downloads http://example.com/tool.tar.gz", "/srv/");
        assert_eq!(trace.destination, "/srv/downloads/tool.tar.gz");
    }

    #[test]
    fn test_wget_output_document_wins() {
        let (_, trace) = fetch("wget -qO node.tgz -P /tmp http://x/node-v1.tgz", "/app");
        assert_eq!(trace.destination, "/app/node.tgz");
        let (_, trace) = fetch("wget -O - http://x/install.sh", "/app");
        assert_eq!(trace.destination, "/app");
    }

    #[test]
    fn test_wget_root_workdir() {
        let (_, trace) = fetch("wget http://x/a.zip", "/");
        assert_eq!(trace.destination, "/a.zip");
    }

    // --- git ---

    #[test]
    fn test_git_clone_default_directory() {
        let (origin, trace) = fetch("git clone https://github.com/org/repo.git", "/src");
        assert_eq!(origin.as_deref(), Some("https://github.com/org/repo.git"));
        assert_eq!(trace.destination, "/src/repo");
        assert_eq!(trace.command, "git clone");
    }

    #[test]
    fn test_git_clone_branch_and_directory() {
        let (_, trace) = fetch(
            "git clone --depth 1 -b v2.0 https://github.com/org/repo/ /opt/repo",
            "/",
        );
        assert_eq!(trace.command, "git clone -b v2.0");
        assert_eq!(trace.destination, "/opt/repo");
    }

    #[test]
    fn test_git_clone_ignores_scp_style() {
        assert!(run("git clone git@github.com:org/repo.git", "/").is_none());
    }

    #[test]
    fn test_git_checkout_links_clone_url() {
        let scope = VariableScope::default();
        let outcome = run_with("git checkout v1.4", "/src/repo", &scope, Some("https://h/r.git"));
        match outcome {
            Some(Outcome::Fetch { origin, trace }) => {
                assert!(origin.is_none());
                assert_eq!(trace.source, "v1.4");
                assert_eq!(trace.destination, "/src/repo");
                assert_eq!(trace.link.as_deref(), Some("https://h/r.git"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_git_checkout_other_forms_ignored() {
        assert!(run("git checkout -b feature", "/").is_none());
        assert!(run("git checkout v1 -- file", "/").is_none());
    }

    // --- tar ---

    #[test]
    fn test_tar_extract_cluster() {
        let trace = step("tar -xzf y.tar.gz", "/build");
        assert_eq!(trace.source, "/build/y.tar.gz");
        assert_eq!(trace.destination, "/build");
        assert_eq!(trace.command, "tar -xzf");
    }

    #[test]
    fn test_tar_directory_option() {
        let trace = step("tar -C /opt -xzf /tmp/tool.tar.gz", "/");
        assert_eq!(trace.source, "/tmp/tool.tar.gz");
        assert_eq!(trace.destination, "/opt");

        let trace = step("tar --directory=/usr/local --strip-components 1 -xzf node.tgz", "/tmp");
        assert_eq!(trace.destination, "/usr/local");
        assert_eq!(trace.source, "/tmp/node.tgz");
    }

    #[test]
    fn test_tar_combined_directory_clusters() {
        let trace = step("tar -xfC /opt /tmp/a.tar", "/");
        assert_eq!(trace.destination, "/opt");
        assert_eq!(trace.source, "/tmp/a.tar");
        assert_eq!(trace.command, "tar -xfC");

        let trace = step("tar -f /tmp/b.tar.xz -xJC /usr/local", "/");
        assert_eq!(trace.destination, "/usr/local");
        assert_eq!(trace.source, "/tmp/b.tar.xz");
    }

    #[test]
    fn test_tar_without_source() {
        assert!(run("tar -czvC /opt", "/").is_none());
        assert!(run("tar --version", "/").is_none());
    }

    // --- unzip ---

    #[test]
    fn test_unzip() {
        let trace = step("unzip -q -P secret gradle-*.zip -d /opt/gradle", "/tmp");
        assert_eq!(trace.source, "/tmp/gradle-*.zip");
        assert_eq!(trace.destination, "/opt/gradle");

        let trace = step("unzip tool.zip", "/srv");
        assert_eq!(trace.destination, "/srv");
    }

    // --- cp / mv ---

    #[test]
    fn test_cp_resolves_both_paths() {
        let trace = step("cp -r tool/bin /usr/local/", "/tmp");
        assert_eq!(trace.command, "cp");
        assert_eq!(trace.source, "/tmp/tool/bin");
        assert_eq!(trace.destination, "/usr/local/");
    }

    #[test]
    fn test_mv() {
        let trace = step("mv /tmp/tool-1.0 tool", "/opt");
        assert_eq!(trace.command, "mv");
        assert_eq!(trace.source, "/tmp/tool-1.0");
        assert_eq!(trace.destination, "/opt/tool");
    }

    #[test]
    fn test_cp_single_argument_ignored() {
        assert!(run("cp file", "/").is_none());
    }

    // --- cd ---

    #[test]
    fn test_cd() {
        assert_eq!(run("cd repo", "/src"), Some(Outcome::ChangeDir("/src/repo".to_string())));
        assert_eq!(run("cd ../lib", "/src/app"), Some(Outcome::ChangeDir("/src/lib".to_string())));
        assert_eq!(run("cd ~", "/src"), Some(Outcome::ChangeDir("~".to_string())));
        assert!(run("cd", "/src").is_none());
    }

    #[test]
    fn test_unknown_verb() {
        assert!(run("make install", "/").is_none());
    }
}
