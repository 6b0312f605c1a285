//! Trace report persistence.
//!
//! The trace report is the full [`DockerfileReport`] dumped as pretty JSON,
//! written before verification so that discovery can be inspected even when
//! no image is available.

use std::path::Path;

use addontrace_core::error::{DiscoverError, Result};
use addontrace_core::DockerfileReport;

/// Write `report` to `path`, creating parent directories.
pub fn save_trace_report(report: &DockerfileReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).map_err(|e| {
        DiscoverError::Other(format!(
            "Failed to write trace report {}: {}",
            path.display(),
            e
        ))
    })?;
    tracing::info!(path = %path.display(), stages = report.build_stages.len(), "Saved trace report");
    Ok(())
}

pub fn load_trace_report(path: &Path) -> Result<DockerfileReport> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DiscoverError::Other(format!(
            "Failed to read trace report {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use addontrace_core::{BuildStage, ImageRef, InstallTrace, Trace};
    use tempfile::TempDir;

    fn trace(command: &str, source: &str, destination: &str) -> Trace {
        Trace {
            command: command.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            workdir: "/".to_string(),
            link: None,
        }
    }

    #[test]
    fn test_trace_report_round_trip() {
        let report = DockerfileReport {
            filepath: "Dockerfile".to_string(),
            filehash: "abc".to_string(),
            filetype: "dockerfile".to_string(),
            build_stages: vec![BuildStage {
                stage_id: "builder".to_string(),
                context: "abc:builder".to_string(),
                start_line: 1,
                end_line: 4,
                image: ImageRef {
                    name: "golang".to_string(),
                    tag: "1.22".to_string(),
                    digest: None,
                },
                addon_installs: vec![InstallTrace {
                    origin: "http://x/tool.tgz".to_string(),
                    origin_hash: None,
                    traces: vec![
                        trace("wget", "http://x/tool.tgz", "/tmp/tool.tgz"),
                        trace("tar -xzf", "/tmp/tool.tgz", "/opt"),
                    ],
                }],
                ..Default::default()
            }],
            ..Default::default()
        };

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/results-trace.json");
        save_trace_report(&report, &path).unwrap();

        let loaded = load_trace_report(&path).unwrap();
        assert_eq!(loaded, report);
        assert_eq!(loaded.build_stages[0].addon_installs[0].traces[1].command, "tar -xzf");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"addon_installs\""));
        assert!(raw.contains("\"key\": \"abc:builder\""));
    }

    #[test]
    fn test_load_missing_report() {
        let dir = TempDir::new().unwrap();
        assert!(load_trace_report(&dir.path().join("none.json")).is_err());
    }
}
