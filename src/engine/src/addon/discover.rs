//! Walks the instructions of one build stage and reconstructs its installs.

use std::collections::BTreeMap;

use addontrace_core::error::DiscoverError;
use addontrace_core::InstallTrace;

use super::correlate::{attach_to_earlier_install, belongs_to_active_install};
use super::copy_add;
use super::handlers::{HandlerContext, HandlerRegistry, Outcome};
use super::scope::{substitute, VariableScope};
use super::segment::segment;
use super::text::{join_path, normalize_path, split_words};
use super::verb::Verb;
use crate::dockerfile::{Instruction, InstructionKind};

const DEFAULT_WORKDIR: &str = "/";

/// What a build stage contributes once all of its instructions are read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageDiscovery {
    pub installs: Vec<InstallTrace>,
    /// ENV bindings of the stage
    pub env_variables: BTreeMap<String, String>,
    /// Scope at the end of the stage
    pub scope: VariableScope,
}

/// Reconstructs install traces from Dockerfile instructions.
pub struct AddonDiscoverer {
    registry: HandlerRegistry,
    identity: String,
}

impl AddonDiscoverer {
    /// `identity` is the origin recorded for files copied from the build context.
    pub fn new(identity: impl Into<String>) -> Self {
        Self::with_registry(identity, HandlerRegistry::default())
    }

    pub fn with_registry(identity: impl Into<String>, registry: HandlerRegistry) -> Self {
        Self {
            registry,
            identity: identity.into(),
        }
    }

    /// Process the instructions of one stage in order, starting from `scope`
    /// (the global build arguments).
    pub fn discover_stage(&self, instructions: &[Instruction], scope: VariableScope) -> StageDiscovery {
        let mut result = StageDiscovery {
            scope,
            ..Default::default()
        };
        let mut workdir = DEFAULT_WORKDIR.to_string();

        for instruction in instructions {
            match &instruction.kind {
                InstructionKind::Arg { pairs } => {
                    result.scope = result.scope.apply_arg(pairs);
                }
                InstructionKind::Env { pairs } => {
                    let (scope, exported) = result.scope.apply_env(pairs);
                    result.scope = scope;
                    result.env_variables.extend(exported);
                }
                InstructionKind::Workdir { path } => {
                    let path = substitute(path, &result.scope);
                    workdir = normalize_path(&join_path(&workdir, &path));
                }
                InstructionKind::Run { command } => {
                    self.discover_run(command, &workdir, &result.scope, &mut result.installs);
                }
                InstructionKind::Copy { args } | InstructionKind::Add { args } => {
                    let verb = if instruction.keyword() == "ADD" {
                        Verb::Add
                    } else {
                        Verb::Copy
                    };
                    match copy_add::handle(verb, args, &workdir, &self.identity, &result.scope) {
                        Ok(install) => result.installs.push(install),
                        Err(DiscoverError::NoTrace(detail)) => {
                            tracing::debug!(line = instruction.line, detail = %detail, "Skipped COPY/ADD");
                        }
                        Err(e) => {
                            tracing::warn!(line = instruction.line, error = %e, "Failed to trace COPY/ADD");
                        }
                    }
                }
                InstructionKind::From { .. } | InstructionKind::Other { .. } => {}
            }
        }

        result
    }

    /// Trace the command sets of one RUN instruction.
    ///
    /// The current directory starts at `workdir` and carries over from one
    /// command set to the next.
    fn discover_run(
        &self,
        command: &str,
        workdir: &str,
        scope: &VariableScope,
        installs: &mut Vec<InstallTrace>,
    ) {
        let mut current_dir = workdir.to_string();

        for set in segment(command) {
            let mut active = InstallTrace::default();
            let mut clone_url: Option<String> = None;

            for fragment in &set.commands {
                let tokens = split_words(fragment);
                let ctx = HandlerContext {
                    workdir: &current_dir,
                    scope,
                    clone_url: clone_url.as_deref(),
                };

                match self.registry.dispatch(&tokens, &ctx) {
                    Some(Outcome::Fetch { origin, trace }) => {
                        if let Some(origin) = origin {
                            if Verb::from_label(&trace.command) == Some(Verb::GitClone) {
                                clone_url = Some(origin.clone());
                            }
                            active.origin = origin;
                        }
                        active.traces.push(trace);
                    }
                    Some(Outcome::Step(trace)) => {
                        if belongs_to_active_install(&trace.source, &active.traces) {
                            active.traces.push(trace);
                        } else if !attach_to_earlier_install(&trace, installs) {
                            tracing::debug!(
                                command = %trace.command,
                                source = %trace.source,
                                "Discarded step without a matching install"
                            );
                        }
                    }
                    Some(Outcome::ChangeDir(dir)) => current_dir = dir,
                    None => tracing::trace!(fragment = %fragment, "Ignored sub-command"),
                }
            }

            if active.is_complete() {
                tracing::debug!(
                    origin = %active.origin,
                    steps = active.traces.len(),
                    "Recorded install"
                );
                installs.push(active);
            }
        }
    }
}
