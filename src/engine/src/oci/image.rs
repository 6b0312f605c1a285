//! Image layouts on disk.
//!
//! Reads the layer list of an OCI image layout (`oci-layout`, `index.json`,
//! `blobs/`) or of a `docker save` archive (`manifest.json`).

use std::path::{Path, PathBuf};

use addontrace_core::error::{DiscoverError, Result};
use oci_spec::image::{ImageIndex, ImageManifest};
use serde::Deserialize;

/// An OCI image layout loaded from disk.
#[derive(Debug)]
pub struct OciImage {
    root_dir: PathBuf,
    /// Digest of the manifest selected from `index.json`
    manifest_digest: String,
    /// Paths to layer blobs (in order, bottom to top)
    layer_paths: Vec<PathBuf>,
}

impl OciImage {
    /// Whether `path` looks like an OCI image layout.
    pub fn is_layout(path: &Path) -> bool {
        path.join("oci-layout").is_file() && path.join("index.json").is_file()
    }

    /// Load an OCI image layout.
    ///
    /// The first manifest of `index.json` is used. Nested indexes (multi-arch
    /// layouts) are followed to their first manifest.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();
        Self::validate_oci_layout(&root_dir)?;

        let index: ImageIndex = read_json(&root_dir.join("index.json"), "index.json")?;
        let mut digest = first_manifest_digest(&index, &root_dir)?;

        // Follow nested indexes until a manifest is reached.
        let manifest = loop {
            let blob = Self::blob_path(&root_dir, &digest);
            let value: serde_json::Value = read_json(&blob, "manifest")?;
            if value.get("manifests").is_some() {
                let nested: ImageIndex = serde_json::from_value(value).map_err(|e| {
                    DiscoverError::ImageError(format!("Failed to parse nested index: {}", e))
                })?;
                digest = first_manifest_digest(&nested, &root_dir)?;
                continue;
            }
            let manifest: ImageManifest = serde_json::from_value(value).map_err(|e| {
                DiscoverError::ImageError(format!("Failed to parse manifest: {}", e))
            })?;
            break manifest;
        };

        let layer_paths = manifest
            .layers()
            .iter()
            .map(|layer| Self::blob_path(&root_dir, layer.digest()))
            .collect();

        Ok(Self {
            root_dir,
            manifest_digest: digest,
            layer_paths,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn manifest_digest(&self) -> &str {
        &self.manifest_digest
    }

    /// Get paths to all layer blobs (in order, bottom to top).
    pub fn layer_paths(&self) -> &[PathBuf] {
        &self.layer_paths
    }

    fn validate_oci_layout(root_dir: &Path) -> Result<()> {
        for required in ["oci-layout", "index.json", "blobs"] {
            if !root_dir.join(required).exists() {
                return Err(DiscoverError::ImageError(format!(
                    "Not a valid OCI layout: missing {} in {}",
                    required,
                    root_dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Get the path to a blob by digest.
    fn blob_path(root_dir: &Path, digest: &str) -> PathBuf {
        let (algorithm, hash) = digest.split_once(':').unwrap_or(("sha256", digest));
        root_dir.join("blobs").join(algorithm).join(hash)
    }
}

fn first_manifest_digest(index: &ImageIndex, root_dir: &Path) -> Result<String> {
    index
        .manifests()
        .first()
        .map(|m| m.digest().to_string())
        .ok_or_else(|| {
            DiscoverError::ImageError(format!(
                "No manifests in index of {}",
                root_dir.display()
            ))
        })
}

/// One entry of a `docker save` manifest.json.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerSaveEntry {
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    layers: Vec<String>,
}

/// A `docker save` archive unpacked on disk.
#[derive(Debug)]
pub struct DockerArchive {
    repo_tags: Vec<String>,
    layer_paths: Vec<PathBuf>,
}

impl DockerArchive {
    pub fn is_archive(path: &Path) -> bool {
        path.join("manifest.json").is_file()
    }

    /// Load the first image of an unpacked `docker save` archive.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref();
        let entries: Vec<DockerSaveEntry> =
            read_json(&root_dir.join("manifest.json"), "manifest.json")?;
        let entry = entries.into_iter().next().ok_or_else(|| {
            DiscoverError::ImageError(format!(
                "No images in manifest.json of {}",
                root_dir.display()
            ))
        })?;

        Ok(Self {
            repo_tags: entry.repo_tags.unwrap_or_default(),
            layer_paths: entry.layers.iter().map(|l| root_dir.join(l)).collect(),
        })
    }

    pub fn repo_tags(&self) -> &[String] {
        &self.repo_tags
    }

    pub fn layer_paths(&self) -> &[PathBuf] {
        &self.layer_paths
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DiscoverError::ImageError(format!(
            "Failed to read {} at {}: {}",
            what,
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| DiscoverError::ImageError(format!("Failed to parse {}: {}", what, e)))
}
