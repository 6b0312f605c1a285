//! Provenance data model.
//!
//! These types are produced by the discovery engine, dumped verbatim into the
//! trace report, and consumed by the SBOM encoders.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File type recorded for Dockerfile reports.
pub const DOCKERFILE_FILETYPE: &str = "dockerfile";

/// A parsed Dockerfile together with its discovered build stages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DockerfileReport {
    pub filepath: String,
    /// SHA-256 (hex) of the Dockerfile bytes
    pub filehash: String,
    pub filetype: String,
    pub build_stages: Vec<BuildStage>,
    /// ARG declarations that precede the first FROM
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,
}

impl DockerfileReport {
    /// Look up a build stage by id (alias or positional index).
    pub fn stage(&self, stage_id: &str) -> Option<&BuildStage> {
        self.build_stages.iter().find(|s| s.stage_id == stage_id)
    }

    /// The last build stage, which produces the final image.
    pub fn final_stage(&self) -> Option<&BuildStage> {
        self.build_stages.last()
    }
}

/// One `FROM ...` segment of a Dockerfile.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BuildStage {
    /// Explicit alias (`AS name`) or positional index
    pub stage_id: String,
    /// `<filehash>:<stage_id>`, stable cross-reference key
    #[serde(rename = "key")]
    pub context: String,
    /// Stage named by a `COPY --from=<stage>` in this stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_stage: Option<String>,
    #[serde(rename = "is_scratch_build", default)]
    pub is_scratch: bool,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(rename = "base_image")]
    pub image: ImageRef,
    /// Original text of the instructions after `FROM`, in order
    #[serde(skip)]
    pub instructions: Vec<String>,
    #[serde(rename = "addon_installs", default)]
    pub addon_installs: Vec<InstallTrace>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_variables: BTreeMap<String, String>,
}

/// Base image reference of a build stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ImageRef {
    /// The `scratch` pseudo image.
    pub fn scratch() -> Self {
        Self {
            name: "scratch".to_string(),
            tag: String::new(),
            digest: None,
        }
    }

    pub fn is_scratch(&self) -> bool {
        self.name == "scratch"
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.tag.is_empty() {
            write!(f, ":{}", self.tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// One recognized shell-level side effect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trace {
    /// Verb label, possibly decorated (`git clone -b main`, `tar -xzf`)
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workdir: String,
    /// Clone URL a `git checkout` refers back to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Trace {
    /// A trace whose destination defaults to the working directory.
    pub fn new(command: impl Into<String>, workdir: impl Into<String>) -> Self {
        let workdir = workdir.into();
        Self {
            command: command.into(),
            source: String::new(),
            destination: workdir.clone(),
            workdir,
            link: None,
        }
    }
}

/// One logical installation: an origin and the ordered steps that belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstallTrace {
    pub origin: String,
    #[serde(rename = "originhash", default, skip_serializing_if = "Option::is_none")]
    pub origin_hash: Option<String>,
    #[serde(default)]
    pub traces: Vec<Trace>,
}

impl InstallTrace {
    /// An install is only retained when it has both an origin and a step.
    pub fn is_complete(&self) -> bool {
        !self.origin.is_empty() && !self.traces.is_empty()
    }
}

/// Ordered raw sub-commands belonging to one installation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandSet {
    pub commands: Vec<String>,
}

/// Content hash of a verified artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentHash {
    /// `sha256:<hex>` for files, `h1:<base64>` for directories
    Digest(String),
    /// Hashing failed; the artifact is kept but needs manual review
    Unavailable,
}

impl ContentHash {
    pub fn digest(&self) -> Option<&str> {
        match self {
            ContentHash::Digest(d) => Some(d),
            ContentHash::Unavailable => None,
        }
    }
}

/// A trace destination confirmed to exist in the image filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedArtifact {
    pub name: String,
    /// Absolute path inside the image
    pub path: String,
    pub is_directory: bool,
    pub is_download: bool,
    pub download_location: String,
    pub hash: ContentHash,
    /// Verb label of the trace that produced this artifact
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Outcome of verifying a set of install traces against an image filesystem.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub artifacts: Vec<VerifiedArtifact>,
    /// tar/unzip steps whose destination cannot be resolved statically
    #[serde(default)]
    pub manual_review: Vec<Trace>,
    /// Resolved paths that were absent or ambiguous
    #[serde(default)]
    pub missing: Vec<String>,
}
