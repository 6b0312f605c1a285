//! Splits a parsed Dockerfile into build stages.

use std::collections::BTreeMap;

use super::parser::{Dockerfile, Instruction, InstructionKind};

/// One `FROM` segment with the instructions that follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    /// Alias, or the positional index when the stage has none
    pub stage_id: String,
    /// Image text as written after `FROM`, before substitution
    pub image: String,
    /// Stage named by the first `COPY --from` that refers to an earlier stage
    pub parent_stage: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    /// Instructions after the `FROM`
    pub instructions: Vec<Instruction>,
}

impl StagePlan {
    pub fn is_scratch(&self) -> bool {
        self.image.trim().eq_ignore_ascii_case("scratch")
    }
}

/// Build stages and the ARG declarations that precede the first `FROM`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageSplit {
    pub global_args: BTreeMap<String, String>,
    pub stages: Vec<StagePlan>,
}

/// Value of a `--from=<stage>` flag in COPY/ADD arguments.
pub fn from_flag(args: &[String]) -> Option<&str> {
    args.iter()
        .take_while(|a| a.starts_with("--"))
        .find_map(|a| a.strip_prefix("--from="))
}

/// Split `dockerfile` at each `FROM`.
///
/// A stage ends on the line before the next `FROM`; the last stage ends on
/// the last line of the file.
pub fn split_stages(dockerfile: &Dockerfile, last_line: usize) -> StageSplit {
    let mut split = StageSplit::default();

    for instruction in &dockerfile.instructions {
        match &instruction.kind {
            InstructionKind::From { image, alias } => {
                if let Some(previous) = split.stages.last_mut() {
                    previous.end_line = instruction.line.saturating_sub(1);
                }
                let stage_id = alias
                    .clone()
                    .unwrap_or_else(|| split.stages.len().to_string());
                split.stages.push(StagePlan {
                    stage_id,
                    image: image.clone(),
                    parent_stage: None,
                    start_line: instruction.line,
                    end_line: instruction.line,
                    instructions: Vec::new(),
                });
            }
            InstructionKind::Arg { pairs } if split.stages.is_empty() => {
                split.global_args.extend(pairs.iter().cloned());
            }
            kind => {
                let Some((current, earlier)) = split.stages.split_last_mut() else {
                    continue;
                };
                if let InstructionKind::Copy { args } = kind {
                    if current.parent_stage.is_none() {
                        current.parent_stage = resolve_parent(args, earlier, &current.stage_id);
                    }
                }
                current.instructions.push(instruction.clone());
            }
        }
    }

    if let Some(last) = split.stages.last_mut() {
        last.end_line = last_line.max(last.start_line);
    }
    split
}

/// Look up the stage named by `COPY --from` among the stages declared before
/// the current one.
fn resolve_parent(args: &[String], earlier: &[StagePlan], current: &str) -> Option<String> {
    let name = from_flag(args)?;
    match earlier.iter().find(|s| s.stage_id == name) {
        Some(stage) => Some(stage.stage_id.clone()),
        None => {
            tracing::warn!(stage = %current, from = %name, "COPY --from refers to an unknown build stage");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(content: &str) -> StageSplit {
        let dockerfile = Dockerfile::parse(content).unwrap();
        split_stages(&dockerfile, content.lines().count())
    }

    #[test]
    fn test_split_two_stages() {
        let content = "ARG BASE=alpine\nFROM golang:1.21 AS build\nRUN make\n\nFROM ${BASE}\nCOPY --from=build /out/app /usr/bin/app\n";
        let result = split(content);

        assert_eq!(result.global_args.get("BASE").map(String::as_str), Some("alpine"));
        assert_eq!(result.stages.len(), 2);

        let build = &result.stages[0];
        assert_eq!(build.stage_id, "build");
        assert_eq!(build.start_line, 2);
        assert_eq!(build.end_line, 4);
        assert_eq!(build.instructions.len(), 1);

        let last = &result.stages[1];
        assert_eq!(last.stage_id, "1");
        assert_eq!(last.image, "${BASE}");
        assert_eq!(last.start_line, 5);
        assert_eq!(last.end_line, 6);
        assert_eq!(last.parent_stage.as_deref(), Some("build"));
    }

    #[test]
    fn test_unknown_parent_stage() {
        let result = split("FROM alpine\nCOPY --from=nginx:latest /etc/nginx /etc/nginx\n");
        assert_eq!(result.stages[0].parent_stage, None);
    }

    #[test]
    fn test_parent_stage_by_index() {
        let result = split("FROM alpine\nRUN true\nFROM scratch\nCOPY --from=0 /bin/sh /bin/sh\n");
        assert_eq!(result.stages[1].parent_stage.as_deref(), Some("0"));
        assert!(result.stages[1].is_scratch());
        assert!(!result.stages[0].is_scratch());
    }

    #[test]
    fn test_from_flag() {
        let args: Vec<String> = ["--chown=a:b", "--from=build", "/src", "/dst"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(from_flag(&args), Some("build"));
        assert_eq!(from_flag(&args[2..]), None);
    }
}
