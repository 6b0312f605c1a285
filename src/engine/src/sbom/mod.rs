//! SBOM encoders.
//!
//! Each [`OutputFormat`] maps to one [`SbomEncoder`]: SPDX 2.2 tag-value,
//! CycloneDX 1.4 JSON, or the raw verification report as JSON.

mod cyclonedx;
mod spdx;

use std::path::Path;

use addontrace_core::error::Result;
use addontrace_core::{ImageRef, OutputFormat, VerificationReport};

pub use cyclonedx::CycloneDxEncoder;
pub use spdx::SpdxEncoder;

/// Name reported as the SBOM creator tool.
pub const TOOL_NAME: &str = "addontrace";

/// Note attached to artifacts whose content could not be hashed.
pub const MANUAL_REVIEW_NOTE: &str = "content hash unavailable, needs manual review";

/// Operating system of the verified image, from `os-release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
}

impl OsRelease {
    /// Read `etc/os-release` (or `usr/lib/os-release`) under `rootfs`.
    ///
    /// Symlinks are not followed so an absolute link never reads the host file.
    pub fn from_rootfs(rootfs: &Path) -> Option<Self> {
        ["etc/os-release", "usr/lib/os-release"]
            .iter()
            .map(|candidate| rootfs.join(candidate))
            .filter(|path| {
                std::fs::symlink_metadata(path)
                    .map(|meta| meta.is_file())
                    .unwrap_or(false)
            })
            .find_map(|path| std::fs::read_to_string(path).ok())
            .and_then(|content| Self::parse(&content))
    }

    pub fn parse(content: &str) -> Option<Self> {
        let mut id = None;
        let mut version_id = String::new();
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
            match key.trim() {
                "ID" => id = Some(value),
                "VERSION_ID" => version_id = value,
                _ => {}
            }
        }
        id.map(|id| Self { id, version_id })
    }
}

/// Everything an encoder needs to describe one verified image.
#[derive(Debug, Clone)]
pub struct SbomInput<'a> {
    pub image: ImageRef,
    /// Document namespace; empty when none was configured
    pub namespace: &'a str,
    pub dockerfile: &'a str,
    pub tool_version: &'a str,
    pub os: Option<OsRelease>,
    pub report: &'a VerificationReport,
}

/// Serializes a verification result into one SBOM document.
pub trait SbomEncoder: Send + Sync {
    fn encode(&self, input: &SbomInput<'_>) -> Result<String>;
}

/// Dumps the verification report as pretty JSON.
pub struct JsonEncoder;

impl SbomEncoder for JsonEncoder {
    fn encode(&self, input: &SbomInput<'_>) -> Result<String> {
        Ok(serde_json::to_string_pretty(input.report)?)
    }
}

/// Encoder for an output format.
pub fn encoder_for(format: OutputFormat) -> Box<dyn SbomEncoder> {
    match format {
        OutputFormat::Spdx => Box::new(SpdxEncoder),
        OutputFormat::Cdx => Box::new(CycloneDxEncoder),
        OutputFormat::Json => Box::new(JsonEncoder),
    }
}

/// Path of an artifact without its leading `/`, for display names.
fn display_path(path: &str) -> &str {
    path.trim_start_matches('/')
}
