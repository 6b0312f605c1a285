//! SPDX 2.2 tag-value documents.

use std::collections::HashSet;
use std::fmt::Write;

use addontrace_core::error::{DiscoverError, Result};
use addontrace_core::{ContentHash, VerifiedArtifact};
use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use super::{display_path, SbomEncoder, SbomInput, MANUAL_REVIEW_NOTE, TOOL_NAME};
use crate::verify::dirhash::FILE_HASH_PREFIX;

const NOASSERTION: &str = "NOASSERTION";
const DOCUMENT_ID: &str = "SPDXRef-DOCUMENT";

/// Writes SPDX 2.2 tag-value.
///
/// Directory artifacts and downloaded files become packages (a downloaded
/// file is also listed as a file contained in its package); files copied
/// from the build context are plain file entries.
pub struct SpdxEncoder;

impl SbomEncoder for SpdxEncoder {
    fn encode(&self, input: &SbomInput<'_>) -> Result<String> {
        render(input).map_err(|e| DiscoverError::SbomError(format!("Failed to render SPDX: {}", e)))
    }
}

fn render(input: &SbomInput<'_>) -> std::result::Result<String, std::fmt::Error> {
    let mut out = String::new();
    let namespace = if input.namespace.trim().is_empty() {
        format!("https://spdx.org/spdxdocs/{}-{}", TOOL_NAME, Uuid::new_v4())
    } else {
        input.namespace.trim().to_string()
    };

    writeln!(out, "SPDXVersion: SPDX-2.2")?;
    writeln!(out, "DataLicense: CC0-1.0")?;
    writeln!(out, "SPDXID: {}", DOCUMENT_ID)?;
    writeln!(out, "DocumentName: SPDX-Docker-Image-Addons-{}", input.image)?;
    writeln!(out, "DocumentNamespace: {}", namespace)?;
    writeln!(out, "Creator: Tool: {}-{}", TOOL_NAME, input.tool_version)?;
    writeln!(
        out,
        "Created: {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    )?;
    let mut document_comment = format!("Add-ons traced from {}", input.dockerfile);
    if let Some(os) = &input.os {
        write!(document_comment, "; base OS {} {}", os.id, os.version_id)?;
    }
    for trace in &input.report.manual_review {
        write!(
            document_comment,
            "; needs manual review: {} {} -> {}",
            trace.command, trace.source, trace.destination
        )?;
    }
    writeln!(out, "DocumentComment: <text>{}</text>", document_comment)?;

    let mut ids = SpdxIds::default();
    for artifact in &input.report.artifacts {
        writeln!(out)?;
        if artifact.is_directory || artifact.is_download {
            write_package(&mut out, &mut ids, artifact)?;
        } else {
            let file_id = ids.allocate("File", &artifact.path);
            write_file(&mut out, &file_id, artifact)?;
            writeln!(out, "Relationship: {} DESCRIBES {}", DOCUMENT_ID, file_id)?;
        }
    }

    Ok(out)
}

fn write_package(
    out: &mut String,
    ids: &mut SpdxIds,
    artifact: &VerifiedArtifact,
) -> std::fmt::Result {
    let package_id = ids.allocate("Package", &artifact.path);
    let download = if artifact.download_location.is_empty() || !artifact.is_download {
        NOASSERTION
    } else {
        artifact.download_location.as_str()
    };

    writeln!(out, "##### Package: {}", artifact.name)?;
    writeln!(out)?;
    writeln!(out, "PackageName: {}", artifact.name)?;
    writeln!(out, "SPDXID: {}", package_id)?;
    writeln!(out, "PackageFileName: {}", display_path(&artifact.path))?;
    writeln!(out, "PackageDownloadLocation: {}", download)?;
    writeln!(out, "FilesAnalyzed: false")?;
    if let Some(hex) = file_sha256(artifact) {
        writeln!(out, "PackageChecksum: SHA256: {}", hex)?;
    }
    writeln!(out, "PackageLicenseConcluded: {}", NOASSERTION)?;
    writeln!(out, "PackageLicenseDeclared: {}", NOASSERTION)?;
    writeln!(out, "PackageCopyrightText: {}", NOASSERTION)?;
    if let Some(comment) = artifact_comment(artifact) {
        writeln!(out, "PackageComment: <text>{}</text>", comment)?;
    }
    writeln!(out, "Relationship: {} DESCRIBES {}", DOCUMENT_ID, package_id)?;

    if !artifact.is_directory {
        writeln!(out)?;
        let file_id = ids.allocate("File", &artifact.path);
        write_file(out, &file_id, artifact)?;
        writeln!(out, "Relationship: {} CONTAINS {}", package_id, file_id)?;
    }
    Ok(())
}

fn write_file(out: &mut String, file_id: &str, artifact: &VerifiedArtifact) -> std::fmt::Result {
    writeln!(out, "FileName: {}", artifact.path)?;
    writeln!(out, "SPDXID: {}", file_id)?;
    if let Some(hex) = file_sha256(artifact) {
        writeln!(out, "FileChecksum: SHA256: {}", hex)?;
    }
    writeln!(out, "LicenseConcluded: {}", NOASSERTION)?;
    writeln!(out, "LicenseInfoInFile: {}", NOASSERTION)?;
    writeln!(out, "FileCopyrightText: {}", NOASSERTION)?;
    if let Some(comment) = artifact_comment(artifact) {
        writeln!(out, "FileComment: <text>{}</text>", comment)?;
    }
    Ok(())
}

fn file_sha256(artifact: &VerifiedArtifact) -> Option<&str> {
    artifact.hash.digest()?.strip_prefix(FILE_HASH_PREFIX)
}

/// Free-text comment: the manual-review note, the directory hash and any
/// provenance comment of the artifact.
fn artifact_comment(artifact: &VerifiedArtifact) -> Option<String> {
    let mut parts = Vec::new();
    match &artifact.hash {
        ContentHash::Unavailable => parts.push(MANUAL_REVIEW_NOTE.to_string()),
        ContentHash::Digest(digest) if artifact.is_directory => {
            parts.push(format!("directory hash {}", digest))
        }
        ContentHash::Digest(_) => {}
    }
    if !artifact.is_download && !artifact.download_location.is_empty() {
        parts.push(format!("copied from {}", artifact.download_location));
    }
    parts.extend(artifact.comment.clone());
    (!parts.is_empty()).then(|| parts.join("; "))
}

/// Allocates unique SPDX identifiers (`[A-Za-z0-9.-]` only).
#[derive(Default)]
struct SpdxIds {
    used: HashSet<String>,
}

impl SpdxIds {
    fn allocate(&mut self, kind: &str, path: &str) -> String {
        let sanitized: String = display_path(path)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let base = format!("SPDXRef-{}-{}", kind, sanitized);
        let mut id = base.clone();
        let mut n = 1;
        while !self.used.insert(id.clone()) {
            n += 1;
            id = format!("{}-{}", base, n);
        }
        id
    }
}
