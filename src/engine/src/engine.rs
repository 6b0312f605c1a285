//! Discovery run for one Dockerfile.
//!
//! Parses the Dockerfile, reconstructs the install traces of every build
//! stage, and when an image is configured verifies the final stage against
//! the image filesystem and writes the SBOM.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use addontrace_core::error::{DiscoverError, Result};
use addontrace_core::model::DOCKERFILE_FILETYPE;
use addontrace_core::{
    BuildStage, DiscoverConfig, DockerfileReport, ImageRef, InstallTrace, VerificationReport,
};
use sha2::{Digest, Sha256};

use crate::addon::copy_add::parse_buildstage_origin;
use crate::addon::correlate::matches_destination;
use crate::addon::{substitute, AddonDiscoverer, VariableScope, Verb};
use crate::dockerfile::{split_stages, Dockerfile, Instruction, InstructionKind};
use crate::oci::{base_image, ImageMaterializer};
use crate::report::save_trace_report;
use crate::sbom::{encoder_for, OsRelease, SbomInput};
use crate::verify::verify;

/// Result of a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub report: DockerfileReport,
    /// Present when an image was verified
    pub verification: Option<VerificationReport>,
    pub trace_report: Option<PathBuf>,
    pub sbom: Option<PathBuf>,
}

/// One discovery run over a configured Dockerfile.
pub struct Discovery {
    config: DiscoverConfig,
}

impl Discovery {
    pub fn new(config: DiscoverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoverConfig {
        &self.config
    }

    /// Parse the Dockerfile and reconstruct the install traces of every stage.
    pub fn discover(&self) -> Result<DockerfileReport> {
        self.config.validate()?;
        let path = &self.config.dockerfile;
        let bytes = std::fs::read(path).map_err(|e| {
            DiscoverError::DockerfileError(format!(
                "Failed to read Dockerfile at {}: {}",
                path.display(),
                e
            ))
        })?;
        let filehash = hex::encode(Sha256::digest(&bytes));
        let content = String::from_utf8_lossy(&bytes);

        discover_dockerfile(
            &content,
            &path.display().to_string(),
            &filehash,
            &self.config,
        )
    }

    /// Discover, then verify against the configured image and write the SBOM.
    ///
    /// The image is materialized into a temporary workspace that is removed
    /// before returning.
    pub async fn run(&self, materializer: &dyn ImageMaterializer) -> Result<DiscoveryOutcome> {
        let report = self.discover()?;

        let trace_report = if self.config.save_trace {
            let path = self.config.trace_report_path();
            save_trace_report(&report, &path)?;
            Some(path)
        } else {
            None
        };

        let Some(reference) = self.config.image.as_deref() else {
            tracing::info!("No image configured, skipping verification");
            return Ok(DiscoveryOutcome {
                report,
                verification: None,
                trace_report,
                sbom: None,
            });
        };

        let final_stage = report.final_stage().ok_or_else(|| {
            DiscoverError::DockerfileError("Dockerfile has no build stages".to_string())
        })?;

        let workspace = tempfile::TempDir::new().map_err(|e| {
            DiscoverError::ImageError(format!("Failed to create image workspace: {}", e))
        })?;
        let rootfs = materializer.materialize(reference, workspace.path()).await?;
        tracing::info!(
            image = %reference,
            rootfs = %rootfs.display(),
            stage = %final_stage.stage_id,
            "Verifying final build stage"
        );

        let mut verification = verify(&final_stage.addon_installs, &rootfs);
        link_build_stages(&mut verification, &report);

        let sbom_input = SbomInput {
            image: image_identity(reference),
            namespace: self.config.namespace.as_deref().unwrap_or_default(),
            dockerfile: &report.filepath,
            tool_version: addontrace_core::VERSION,
            os: OsRelease::from_rootfs(&rootfs),
            report: &verification,
        };
        let document = encoder_for(self.config.format).encode(&sbom_input)?;
        drop(workspace);

        let sbom_path = self.config.sbom_path();
        write_output(&sbom_path, &document)?;
        tracing::info!(
            path = %sbom_path.display(),
            format = %self.config.format,
            artifacts = verification.artifacts.len(),
            "Saved SBOM"
        );

        Ok(DiscoveryOutcome {
            report,
            verification: Some(verification),
            trace_report,
            sbom: Some(sbom_path),
        })
    }
}

/// Reconstruct the build stages of Dockerfile `content`.
///
/// `filehash` keys the stages and, without a namespace, identifies the
/// local build context.
pub fn discover_dockerfile(
    content: &str,
    filepath: &str,
    filehash: &str,
    config: &DiscoverConfig,
) -> Result<DockerfileReport> {
    let dockerfile = Dockerfile::parse(content)?;
    let split = split_stages(&dockerfile, content.lines().count());

    let mut global_args = split.global_args.clone();
    for (name, value) in &config.build_args {
        global_args.insert(name.clone(), value.clone());
    }
    let global_scope = VariableScope::new(global_args);
    let discoverer = AddonDiscoverer::new(config.local_identity(filehash));

    let mut build_stages = Vec::with_capacity(split.stages.len());
    for plan in &split.stages {
        let instructions = with_build_args(&plan.instructions, &config.build_args);
        let discovery = discoverer.discover_stage(&instructions, global_scope.clone());
        let image = base_image(&substitute(&plan.image, &discovery.scope));

        tracing::info!(
            stage = %plan.stage_id,
            image = %image,
            installs = discovery.installs.len(),
            "Discovered build stage"
        );

        build_stages.push(BuildStage {
            stage_id: plan.stage_id.clone(),
            context: format!("{}:{}", filehash, plan.stage_id),
            parent_stage: plan.parent_stage.clone(),
            is_scratch: image.is_scratch(),
            start_line: plan.start_line,
            end_line: plan.end_line,
            image,
            instructions: plan.instructions.iter().map(|i| i.original.clone()).collect(),
            addon_installs: discovery.installs,
            env_variables: discovery.env_variables,
        });
    }

    Ok(DockerfileReport {
        filepath: filepath.to_string(),
        filehash: filehash.to_string(),
        filetype: DOCKERFILE_FILETYPE.to_string(),
        build_stages,
        build_args: split.global_args,
    })
}

/// Stage ARG defaults give way to `--build-arg` overrides.
fn with_build_args(
    instructions: &[Instruction],
    build_args: &BTreeMap<String, String>,
) -> Vec<Instruction> {
    instructions
        .iter()
        .map(|instruction| match &instruction.kind {
            InstructionKind::Arg { pairs } if !build_args.is_empty() => {
                let pairs = pairs
                    .iter()
                    .map(|(name, value)| {
                        let value = build_args.get(name).unwrap_or(value);
                        (name.clone(), value.clone())
                    })
                    .collect();
                Instruction {
                    kind: InstructionKind::Arg { pairs },
                    ..instruction.clone()
                }
            }
            _ => instruction.clone(),
        })
        .collect()
}

/// Resolve `buildstage:` artifacts to the install of the stage that produced
/// them: the artifact inherits that install's download flag and origin, and
/// records where it was built.
pub fn link_build_stages(verification: &mut VerificationReport, report: &DockerfileReport) {
    for artifact in &mut verification.artifacts {
        let Some((stage_id, _)) = parse_buildstage_origin(&artifact.download_location) else {
            continue;
        };
        let stage_id = stage_id.to_string();

        match resolve_stage_install(&artifact.download_location, report) {
            Some(install) => {
                let is_download = install
                    .traces
                    .iter()
                    .any(|t| Verb::from_label(&t.command).is_some_and(|v| v.is_fetch()));
                artifact.comment = Some(format!(
                    "built in stage {} ({})",
                    stage_id, artifact.download_location
                ));
                artifact.is_download = is_download;
                artifact.download_location = install.origin.clone();
            }
            None => {
                tracing::debug!(
                    path = %artifact.path,
                    stage = %stage_id,
                    "No install in build stage matches copied artifact"
                );
                artifact.comment = Some(format!("copied from build stage {}", stage_id));
            }
        }
    }
}

/// Follow `buildstage:` origins (possibly chained through several stages)
/// to the install that created the copied paths.
fn resolve_stage_install<'a>(origin: &str, report: &'a DockerfileReport) -> Option<&'a InstallTrace> {
    let mut origin = origin.to_string();
    for _ in 0..report.build_stages.len() {
        let (stage_id, sources) = parse_buildstage_origin(&origin)?;
        let stage = report.stage(stage_id)?;
        let install = stage.addon_installs.iter().rev().find(|install| {
            install.traces.iter().any(|trace| {
                sources
                    .iter()
                    .any(|source| matches_destination(source, &trace.destination))
            })
        })?;
        if parse_buildstage_origin(&install.origin).is_none() {
            return Some(install);
        }
        origin = install.origin.clone();
    }
    None
}

/// Identity of the verified image for the SBOM.
///
/// Local paths are reported as written; registry references are split into
/// name, tag and digest.
fn image_identity(reference: &str) -> ImageRef {
    if Path::new(reference).exists() {
        ImageRef {
            name: reference.to_string(),
            tag: String::new(),
            digest: None,
        }
    } else {
        base_image(reference)
    }
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content).map_err(|e| {
        DiscoverError::SbomError(format!("Failed to write {}: {}", path.display(), e))
    })
}
