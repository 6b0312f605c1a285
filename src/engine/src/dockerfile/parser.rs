//! Dockerfile parser.
//!
//! Parses a Dockerfile into a sequence of located instructions.
//! Supports line continuations (`\`), comments, and both shell and JSON
//! (exec) forms for RUN. Only the instructions that carry provenance are
//! decoded; every other known keyword is kept verbatim.

use addontrace_core::error::{DiscoverError, Result};

use crate::addon::text::{split_words, trim_quotes};

/// Marker left where a `\` line continuation joined two physical lines.
///
/// Shell scripts chained with `; \` rely on it to keep their command boundaries.
pub const CONTINUATION: &str = " \t";

/// Keywords that are accepted but not interpreted.
const PASSTHROUGH_KEYWORDS: &[&str] = &[
    "CMD",
    "ENTRYPOINT",
    "EXPOSE",
    "LABEL",
    "USER",
    "VOLUME",
    "SHELL",
    "STOPSIGNAL",
    "HEALTHCHECK",
    "ONBUILD",
    "MAINTAINER",
];

/// The decoded form of one Dockerfile instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// `FROM [--platform=<p>] <image> [AS <alias>]`
    From {
        image: String,
        alias: Option<String>,
    },
    /// `RUN <command>` (shell form, or exec form joined with spaces)
    Run { command: String },
    /// `COPY [flags] <src>... <dst>`, raw argument tokens
    Copy { args: Vec<String> },
    /// `ADD [flags] <src>... <dst>`, raw argument tokens
    Add { args: Vec<String> },
    /// `WORKDIR <path>`
    Workdir { path: String },
    /// `ENV <key>=<value> ...` or `ENV <key> <value>`
    Env { pairs: Vec<(String, String)> },
    /// `ARG <name>[=<default>] ...`; a missing default is an empty string
    Arg { pairs: Vec<(String, String)> },
    /// Any other known instruction
    Other { keyword: String, rest: String },
}

/// One Dockerfile instruction with its position and original text.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// 1-based line where the instruction starts
    pub line: usize,
    /// Original text with continuations joined
    pub original: String,
    pub kind: InstructionKind,
}

impl Instruction {
    /// Upper-case instruction keyword.
    pub fn keyword(&self) -> &str {
        match &self.kind {
            InstructionKind::From { .. } => "FROM",
            InstructionKind::Run { .. } => "RUN",
            InstructionKind::Copy { .. } => "COPY",
            InstructionKind::Add { .. } => "ADD",
            InstructionKind::Workdir { .. } => "WORKDIR",
            InstructionKind::Env { .. } => "ENV",
            InstructionKind::Arg { .. } => "ARG",
            InstructionKind::Other { keyword, .. } => keyword,
        }
    }
}

/// Parsed Dockerfile: instructions in order.
#[derive(Debug, Clone)]
pub struct Dockerfile {
    pub instructions: Vec<Instruction>,
}

impl Dockerfile {
    /// Parse a Dockerfile from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        let mut instructions = Vec::new();

        for (line_num, line) in join_continuation_lines(content) {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            instructions.push(parse_instruction(trimmed, line_num)?);
        }

        if instructions.is_empty() {
            return Err(DiscoverError::DockerfileError(
                "Dockerfile is empty or contains no instructions".to_string(),
            ));
        }

        let first_non_arg = instructions
            .iter()
            .find(|i| !matches!(i.kind, InstructionKind::Arg { .. }));
        if !matches!(
            first_non_arg.map(|i| &i.kind),
            Some(InstructionKind::From { .. })
        ) {
            return Err(DiscoverError::DockerfileError(
                "First instruction must be FROM (or ARG before FROM)".to_string(),
            ));
        }

        Ok(Dockerfile { instructions })
    }
}

/// Join lines ending with `\` into logical lines tagged with their first line number.
///
/// Comment and blank lines inside a continuation are dropped, as Docker does.
fn join_continuation_lines(content: &str) -> Vec<(usize, String)> {
    let mut logical_lines = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    for (idx, line) in content.lines().enumerate() {
        let continuing = !current.is_empty();
        if continuing {
            let inner = line.trim_start();
            if inner.is_empty() || inner.starts_with('#') {
                continue;
            }
        } else {
            start = idx + 1;
        }

        let line = line.trim_end();
        if let Some(head) = line.strip_suffix('\\') {
            current.push_str(head.trim_end());
            current.push_str(CONTINUATION);
        } else {
            current.push_str(line);
            logical_lines.push((start, std::mem::take(&mut current)));
        }
    }

    if !current.is_empty() {
        logical_lines.push((start, current));
    }

    logical_lines
}

/// Parse a single logical line into an Instruction.
fn parse_instruction(line: &str, line_num: usize) -> Result<Instruction> {
    let (keyword, rest) = split_first_word(line);
    let keyword_upper = keyword.to_uppercase();

    let kind = match keyword_upper.as_str() {
        "FROM" => parse_from(rest, line_num)?,
        "RUN" => parse_run(rest, line_num)?,
        "COPY" => InstructionKind::Copy {
            args: parse_copy_args("COPY", rest, line_num)?,
        },
        "ADD" => InstructionKind::Add {
            args: parse_copy_args("ADD", rest, line_num)?,
        },
        "WORKDIR" => parse_workdir(rest, line_num)?,
        "ENV" => InstructionKind::Env {
            pairs: parse_assignments("ENV", rest, line_num)?,
        },
        "ARG" => InstructionKind::Arg {
            pairs: parse_assignments("ARG", rest, line_num)?,
        },
        k if PASSTHROUGH_KEYWORDS.contains(&k) => InstructionKind::Other {
            keyword: keyword_upper.clone(),
            rest: rest.to_string(),
        },
        _ => {
            return Err(DiscoverError::DockerfileError(format!(
                "Line {}: Unknown instruction '{}'",
                line_num, keyword
            )))
        }
    };

    Ok(Instruction {
        line: line_num,
        original: line.to_string(),
        kind,
    })
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

// --- Individual instruction parsers ---

fn parse_from(rest: &str, line_num: usize) -> Result<InstructionKind> {
    let words: Vec<&str> = rest
        .split_whitespace()
        .filter(|w| !w.starts_with("--"))
        .collect();

    let image = words.first().ok_or_else(|| {
        DiscoverError::DockerfileError(format!(
            "Line {}: FROM requires an image argument",
            line_num
        ))
    })?;

    let alias = match words.as_slice() {
        [_, as_kw, alias, ..] if as_kw.eq_ignore_ascii_case("AS") => Some(alias.to_string()),
        _ => None,
    };

    Ok(InstructionKind::From {
        image: image.to_string(),
        alias,
    })
}

fn parse_run(rest: &str, line_num: usize) -> Result<InstructionKind> {
    // Drop RUN flags such as --mount=... and --network=...
    let mut body = rest.trim_start();
    while body.starts_with("--") {
        let (_, after) = split_first_word(body);
        body = after;
    }

    if body.is_empty() {
        return Err(DiscoverError::DockerfileError(format!(
            "Line {}: RUN requires a command",
            line_num
        )));
    }

    let command = if body.starts_with('[') {
        parse_json_array(body, line_num)?.join(" ")
    } else {
        body.to_string()
    };

    Ok(InstructionKind::Run { command })
}

fn parse_copy_args(keyword: &str, rest: &str, line_num: usize) -> Result<Vec<String>> {
    // Flags come first in both forms: COPY --from=x ["a", "b"]
    let mut args = Vec::new();
    let mut body = rest.trim_start();
    while body.starts_with("--") {
        let (flag, after) = split_first_word(body);
        args.push(flag.to_string());
        body = after;
    }

    if body.starts_with('[') {
        args.extend(parse_json_array(body.trim(), line_num)?);
    } else {
        args.extend(split_words(body));
    }

    if args.is_empty() {
        return Err(DiscoverError::DockerfileError(format!(
            "Line {}: {} requires source and destination",
            line_num, keyword
        )));
    }
    Ok(args)
}

fn parse_workdir(rest: &str, line_num: usize) -> Result<InstructionKind> {
    if rest.is_empty() {
        return Err(DiscoverError::DockerfileError(format!(
            "Line {}: WORKDIR requires a path",
            line_num
        )));
    }
    Ok(InstructionKind::Workdir {
        path: trim_quotes(rest.trim()).to_string(),
    })
}

/// Parse the assignments of an ARG or ENV instruction.
///
/// Forms:
/// - `NAME=VALUE [NAME2=VALUE2 ...]`
/// - `NAME VALUE` (ENV takes the whole remainder as value)
/// - `NAME` (ARG without default)
fn parse_assignments(keyword: &str, rest: &str, line_num: usize) -> Result<Vec<(String, String)>> {
    let words = split_words(rest);
    if words.is_empty() {
        return Err(DiscoverError::DockerfileError(format!(
            "Line {}: {} requires a name",
            line_num, keyword
        )));
    }

    if words.iter().all(|w| w.contains('=')) {
        return Ok(words
            .iter()
            .filter_map(|w| w.split_once('='))
            .map(|(k, v)| (k.to_string(), trim_quotes(v).to_string()))
            .collect());
    }

    if keyword == "ENV" {
        let (key, value) = split_first_word(rest);
        return Ok(vec![(key.to_string(), trim_quotes(value.trim()).to_string())]);
    }

    if words.len() == 2 && !words[1].contains('=') {
        return Ok(vec![(words[0].clone(), trim_quotes(&words[1]).to_string())]);
    }

    Ok(words
        .iter()
        .map(|w| match w.split_once('=') {
            Some((k, v)) => (k.to_string(), trim_quotes(v).to_string()),
            None => (w.clone(), String::new()),
        })
        .collect())
}

/// Parse a JSON array string like `["a", "b", "c"]` into a Vec<String>.
fn parse_json_array(s: &str, line_num: usize) -> Result<Vec<String>> {
    serde_json::from_str(s).map_err(|e| {
        DiscoverError::DockerfileError(format!(
            "Line {}: Invalid JSON array '{}': {}",
            line_num, s, e
        ))
    })
}
