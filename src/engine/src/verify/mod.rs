//! Verifies reconstructed install traces against an unpacked image filesystem.

pub mod dirhash;

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use addontrace_core::{ContentHash, InstallTrace, Trace, VerificationReport, VerifiedArtifact};

use crate::addon::text::{basename, normalize_path};
use crate::addon::Verb;

/// Symlinks followed while resolving one image path before giving up.
const MAX_SYMLINK_HOPS: usize = 40;

/// Cross-checks install traces against the root filesystem at `fs_root`.
pub struct Verifier {
    fs_root: PathBuf,
}

impl Verifier {
    pub fn new(fs_root: impl Into<PathBuf>) -> Self {
        Self {
            fs_root: fs_root.into(),
        }
    }

    pub fn fs_root(&self) -> &Path {
        &self.fs_root
    }

    /// Verify every trace of every install.
    ///
    /// Missing or ambiguous destinations are recorded in the report instead
    /// of failing the batch. tar and unzip steps are also listed for manual
    /// review because the archive members are unknown.
    pub fn verify(&self, installs: &[InstallTrace]) -> VerificationReport {
        let mut report = VerificationReport::default();

        for install in installs {
            let is_download = install
                .traces
                .iter()
                .any(|t| Verb::from_label(&t.command).is_some_and(|v| v.is_fetch()));

            for trace in &install.traces {
                let verb = Verb::from_label(&trace.command);
                if verb.is_some_and(|v| v.is_extraction()) {
                    report.manual_review.push(trace.clone());
                }

                let resolved = match verb {
                    Some(Verb::Copy) | Some(Verb::Add) => copy_add_destination(trace),
                    Some(Verb::Cp) => self.cp_destination(trace),
                    Some(Verb::Mv) => mv_destination(trace),
                    _ => trace.destination.clone(),
                };

                if resolved.is_empty() || resolved == "/" {
                    tracing::debug!(
                        command = %trace.command,
                        destination = %trace.destination,
                        "Destination is ambiguous"
                    );
                    report.missing.push(trace.destination.clone());
                    continue;
                }

                for path in self.expand(&resolved) {
                    let located = self.host_path(&path, false).and_then(|host| {
                        std::fs::symlink_metadata(&host)
                            .ok()
                            .map(|metadata| (host, metadata))
                    });
                    match located {
                        Some((host, metadata)) => report.artifacts.push(self.artifact(
                            install,
                            trace,
                            path,
                            &host,
                            &metadata,
                            is_download,
                        )),
                        None => {
                            tracing::debug!(path = %path, "Artifact not found in image");
                            report.missing.push(path);
                        }
                    }
                }
            }
        }

        tracing::debug!(
            artifacts = report.artifacts.len(),
            missing = report.missing.len(),
            manual_review = report.manual_review.len(),
            "Verified install traces"
        );
        report
    }

    fn artifact(
        &self,
        install: &InstallTrace,
        trace: &Trace,
        path: String,
        host_path: &Path,
        metadata: &Metadata,
        is_download: bool,
    ) -> VerifiedArtifact {
        let file_type = metadata.file_type();
        let hashed = if file_type.is_dir() {
            dirhash::hash_dir(host_path)
        } else if file_type.is_symlink() {
            dirhash::hash_symlink(host_path)
        } else {
            dirhash::hash_file(host_path)
        };

        let hash = match hashed {
            Ok(digest) => ContentHash::Digest(digest),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to hash artifact");
                ContentHash::Unavailable
            }
        };

        VerifiedArtifact {
            name: basename(&path).to_string(),
            path,
            is_directory: file_type.is_dir(),
            is_download,
            download_location: install.origin.clone(),
            hash,
            command: trace.command.clone(),
            comment: None,
        }
    }

    /// Host path of an absolute path inside the image.
    ///
    /// Symlinks met on the way are resolved inside `fs_root`: absolute
    /// targets restart at the image root and `..` never climbs above it.
    /// The final component is only followed when `follow_final` is set.
    /// Returns `None` when the hop limit is exceeded.
    fn host_path(&self, image_path: &str, follow_final: bool) -> Option<PathBuf> {
        let mut pending: Vec<String> = Vec::new();
        push_components(&mut pending, image_path);
        let mut resolved = self.fs_root.clone();
        let mut depth = 0usize;
        let mut hops = 0usize;

        while let Some(component) = pending.pop() {
            if component == ".." {
                if depth > 0 {
                    resolved.pop();
                    depth -= 1;
                }
                continue;
            }

            let candidate = resolved.join(&component);
            if !pending.is_empty() || follow_final {
                if let Ok(target) = std::fs::read_link(&candidate) {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        tracing::debug!(path = %image_path, "Too many symlinks");
                        return None;
                    }
                    let target = target.to_string_lossy().into_owned();
                    if target.starts_with('/') {
                        resolved = self.fs_root.clone();
                        depth = 0;
                    }
                    push_components(&mut pending, &target);
                    continue;
                }
            }
            resolved = candidate;
            depth += 1;
        }
        Some(resolved)
    }

    /// `cp` into a directory of the image appends the source basename,
    /// unless the source is a bare `*`.
    fn cp_destination(&self, trace: &Trace) -> String {
        let destination = trace.destination.as_str();
        // `dir/.` names the directory; `dir/..` is its parent and stays as written
        let destination = match destination.strip_suffix('.') {
            Some(dir) if dir.is_empty() || dir.ends_with('/') => dir,
            _ => destination,
        };
        let destination = destination.strip_suffix('/').unwrap_or(destination);
        let name = basename(&trace.source);
        let is_dir = self
            .host_path(destination, true)
            .is_some_and(|host| host.is_dir());
        if name != "*" && is_dir {
            format!("{}/{}", destination, name)
        } else {
            destination.to_string()
        }
    }

    /// Expand a wildcard in the final path component.
    fn expand(&self, path: &str) -> Vec<String> {
        let path = normalize_path(path);
        if !basename(&path).contains(|c: char| c == '*' || c == '?') {
            return vec![path];
        }

        let (dir, name) = path.rsplit_once('/').unwrap_or(("", path.as_str()));
        let Some(host_dir) = self.host_path(dir, true) else {
            return vec![path];
        };
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&host_dir.to_string_lossy()).trim_end_matches('/'),
            name
        );
        let matches: Vec<String> = match glob::glob(&pattern) {
            Ok(paths) => paths
                .filter_map(|entry| entry.ok())
                .filter_map(|p| {
                    p.file_name()
                        .map(|file| format!("{}/{}", dir, file.to_string_lossy()))
                })
                .collect(),
            Err(e) => {
                tracing::debug!(pattern = %pattern, error = %e, "Invalid wildcard destination");
                Vec::new()
            }
        };

        if matches.is_empty() {
            vec![path]
        } else {
            matches
        }
    }
}

/// Push the components of `path` so that the first one is popped first.
fn push_components(stack: &mut Vec<String>, path: &str) {
    stack.extend(
        path.split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .rev()
            .map(String::from),
    );
}

/// COPY/ADD into a directory: `dest/` gains the source basename, and
/// `dest/.` is replaced by `dest/<basename>`.
fn copy_add_destination(trace: &Trace) -> String {
    let destination = &trace.destination;
    if let Some(dir) = destination.strip_suffix("/.") {
        return format!("{}/{}", dir, basename(&trace.source));
    }
    if destination.ends_with('/') && !trace.source.ends_with('/') {
        return format!("{}{}", destination, basename(&trace.source));
    }
    destination.clone()
}

/// `mv src dir/.` lands at `dir/<basename>`.
fn mv_destination(trace: &Trace) -> String {
    match trace.destination.strip_suffix("/.") {
        Some(dir) => format!("{}/{}", dir, basename(&trace.source)),
        None => trace.destination.clone(),
    }
}

/// Verify `installs` against the root filesystem at `fs_root`.
pub fn verify(installs: &[InstallTrace], fs_root: &Path) -> VerificationReport {
    Verifier::new(fs_root).verify(installs)
}
