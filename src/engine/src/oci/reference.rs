//! Image reference parsing.
//!
//! Parses references like `ghcr.io/org/tool:v1.0` both for registry pulls
//! and for the base image of a `FROM` instruction.

use addontrace_core::error::{DiscoverError, Result};
use addontrace_core::ImageRef;

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Parsed registry image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/tool")
    pub repository: String,
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

/// Split `name[:tag][@digest]`. The tag separator is the last `:` after the
/// last `/`, so a registry port is never taken for a tag.
fn split_reference(reference: &str) -> (&str, Option<&str>, Option<&str>) {
    let (name_tag, digest) = match reference.rfind('@') {
        Some(at) => (&reference[..at], Some(&reference[at + 1..])),
        None => (reference, None),
    };

    let tail_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    match name_tag[tail_start..].rfind(':') {
        Some(colon) => (
            &name_tag[..tail_start + colon],
            Some(&name_tag[tail_start + colon + 1..]),
            digest,
        ),
        None => (name_tag, None, digest),
    }
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `myuser/myimage:v1` → docker.io/myuser/myimage:v1
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(DiscoverError::ImageError(
                "Empty image reference".to_string(),
            ));
        }

        let (name, tag, digest) = split_reference(reference);
        if let Some(digest) = digest {
            if !digest.contains(':') {
                return Err(DiscoverError::ImageError(format!(
                    "Invalid digest format in reference '{}': expected algorithm:hex",
                    reference
                )));
            }
        }

        let (registry, repository) = Self::split_registry_repository(name)?;

        let tag = match (tag, digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(String::from),
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest: digest.map(String::from),
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        if let Some(slash_pos) = name.find('/') {
            let first = &name[..slash_pos];
            if first.contains('.') || first.contains(':') || first == "localhost" {
                let repo = &name[slash_pos + 1..];
                if repo.is_empty() {
                    return Err(DiscoverError::ImageError(format!(
                        "Empty repository in reference '{}'",
                        name
                    )));
                }
                return Ok((first.to_string(), repo.to_string()));
            }
        }

        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("library/{}", name)
        };
        Ok((DEFAULT_REGISTRY.to_string(), repository))
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Base image of a `FROM` instruction, as written (no registry defaulting).
///
/// `scratch` maps to [`ImageRef::scratch`]; a missing tag without a digest
/// becomes `latest`.
pub fn base_image(text: &str) -> ImageRef {
    let text = text.trim();
    if text.eq_ignore_ascii_case("scratch") {
        return ImageRef::scratch();
    }
    let (name, tag, digest) = split_reference(text);
    let tag = match (tag, digest) {
        (Some(tag), _) => tag.to_string(),
        (None, None) => DEFAULT_TAG.to_string(),
        (None, Some(_)) => String::new(),
    };
    ImageRef {
        name: name.to_string(),
        tag,
        digest: digest.map(String::from),
    }
}
