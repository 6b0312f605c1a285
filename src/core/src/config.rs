use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DiscoverError, Result};

/// Base name used for output files when no output path is configured.
pub const DEFAULT_OUTPUT_STEM: &str = "results";

/// SBOM output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// SPDX 2.2 tag-value
    Spdx,
    /// CycloneDX 1.4 JSON
    Cdx,
    /// Raw verification report as JSON
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Cdx
    }
}

impl OutputFormat {
    /// File extension appended to the output stem.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Spdx => "spdx",
            Self::Cdx => "cdx.json",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spdx => write!(f, "spdx"),
            Self::Cdx => write!(f, "cdx"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spdx" => Ok(Self::Spdx),
            "cdx" | "cyclonedx" => Ok(Self::Cdx),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "unknown output format: '{}' (supported: spdx, cdx, json)",
                s
            )),
        }
    }
}

/// Discovery run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverConfig {
    /// Dockerfile to analyse
    pub dockerfile: PathBuf,

    /// Image to verify against (registry reference, OCI layout, tarball or rootfs dir)
    pub image: Option<String>,

    /// SBOM namespace; also the identity of local build-context files
    pub namespace: Option<String>,

    /// Output file path; its extension is replaced per format
    pub output: Option<PathBuf>,

    /// SBOM format
    pub format: OutputFormat,

    /// Write the trace report next to the SBOM
    pub save_trace: bool,

    /// Build argument overrides (`--build-arg KEY=VALUE`)
    pub build_args: BTreeMap<String, String>,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            dockerfile: PathBuf::from("Dockerfile"),
            image: None,
            namespace: None,
            output: None,
            format: OutputFormat::default(),
            save_trace: false,
            build_args: BTreeMap::new(),
        }
    }
}

impl DiscoverConfig {
    /// Load a configuration file. `.json` files are read as JSON, anything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DiscoverError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };

        tracing::debug!(path = %path.display(), "Loaded discovery config");
        Ok(config)
    }

    /// Check the configuration before a run.
    pub fn validate(&self) -> Result<()> {
        if self.dockerfile.as_os_str().is_empty() {
            return Err(DiscoverError::ConfigError(
                "A Dockerfile path is required".to_string(),
            ));
        }
        if let Some(key) = self.build_args.keys().find(|k| k.is_empty()) {
            return Err(DiscoverError::ConfigError(format!(
                "Invalid build arg name '{}'",
                key
            )));
        }
        Ok(())
    }

    /// Identity recorded as origin for files copied from the local build context.
    ///
    /// Falls back to the Dockerfile hash when no namespace is configured.
    pub fn local_identity(&self, dockerfile_hash: &str) -> String {
        match self.namespace.as_deref().map(str::trim) {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => format!("context:{}", dockerfile_hash),
        }
    }

    /// Path of the SBOM file for the configured format.
    pub fn sbom_path(&self) -> PathBuf {
        self.output_with_suffix(self.format.extension())
    }

    /// Path of the trace report.
    pub fn trace_report_path(&self) -> PathBuf {
        self.output_with_suffix("trace.json")
    }

    fn output_with_suffix(&self, suffix: &str) -> PathBuf {
        let stem = match &self.output {
            Some(out) if !out.as_os_str().is_empty() => out.with_extension(""),
            _ => PathBuf::from(DEFAULT_OUTPUT_STEM),
        };
        let joiner = if suffix == "trace.json" { "-" } else { "." };
        let mut name = stem.into_os_string();
        name.push(joiner);
        name.push(suffix);
        PathBuf::from(name)
    }
}
