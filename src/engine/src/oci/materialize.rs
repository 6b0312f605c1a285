//! Turns an image reference into an unpacked root filesystem.

use std::path::{Path, PathBuf};

use addontrace_core::error::{DiscoverError, Result};
use async_trait::async_trait;

use super::daemon::DockerDaemon;
use super::image::{DockerArchive, OciImage};
use super::layers::{apply_layer, flatten};
use super::reference::ImageReference;
use super::registry::{RegistryAuth, RegistryPuller};

/// Produces the root filesystem of an image.
#[async_trait]
pub trait ImageMaterializer: Send + Sync {
    /// Materialize `reference` and return the root filesystem path.
    ///
    /// `workspace` is an empty scratch directory owned by the caller; anything
    /// written there is removed after the run.
    async fn materialize(&self, reference: &str, workspace: &Path) -> Result<PathBuf>;
}

/// Resolves local directories, archives, daemon images and registry references.
///
/// Resolution order: OCI layout directory, unpacked rootfs directory,
/// tarball (`docker save`, OCI layout archive or flat export), image of the
/// local Docker daemon, registry pull.
pub struct DefaultMaterializer {
    auth: RegistryAuth,
    daemon: Option<DockerDaemon>,
}

impl Default for DefaultMaterializer {
    fn default() -> Self {
        Self::with_auth(RegistryAuth::from_env())
    }
}

impl DefaultMaterializer {
    pub fn with_auth(auth: RegistryAuth) -> Self {
        Self {
            auth,
            daemon: Some(DockerDaemon::default()),
        }
    }

    /// Replace the Docker daemon consulted before a registry pull; `None`
    /// goes straight to the registry.
    pub fn with_daemon(mut self, daemon: Option<DockerDaemon>) -> Self {
        self.daemon = daemon;
        self
    }

    /// Unpack a tarball into `workspace/archive` and find the rootfs in it.
    fn from_archive(archive: &Path, workspace: &Path) -> Result<PathBuf> {
        let unpacked = workspace.join("archive");
        apply_layer(archive, &unpacked)?;

        if OciImage::is_layout(&unpacked) {
            tracing::debug!(archive = %archive.display(), "Archive holds an OCI layout");
            return Self::from_layout(&unpacked, workspace);
        }
        if DockerArchive::is_archive(&unpacked) {
            let image = DockerArchive::from_path(&unpacked)?;
            tracing::debug!(
                archive = %archive.display(),
                tags = ?image.repo_tags(),
                "Archive holds a docker save image"
            );
            let rootfs = workspace.join("rootfs");
            flatten(image.layer_paths(), &rootfs)?;
            return Ok(rootfs);
        }

        tracing::debug!(archive = %archive.display(), "Archive is a flat filesystem export");
        Ok(unpacked)
    }

    fn from_layout(layout: &Path, workspace: &Path) -> Result<PathBuf> {
        let image = OciImage::from_path(layout)?;
        let rootfs = workspace.join("rootfs");
        flatten(image.layer_paths(), &rootfs)?;
        tracing::debug!(
            layout = %image.root_dir().display(),
            manifest = %image.manifest_digest(),
            "Flattened OCI layout"
        );
        Ok(rootfs)
    }
}

#[async_trait]
impl ImageMaterializer for DefaultMaterializer {
    async fn materialize(&self, reference: &str, workspace: &Path) -> Result<PathBuf> {
        let local = Path::new(reference);

        if local.is_dir() {
            if OciImage::is_layout(local) {
                return Self::from_layout(local, workspace);
            }
            tracing::info!(rootfs = %local.display(), "Using unpacked root filesystem");
            return Ok(local.to_path_buf());
        }
        if local.is_file() {
            tracing::info!(archive = %local.display(), "Unpacking image archive");
            return Self::from_archive(local, workspace);
        }
        if looks_like_path(reference) {
            return Err(DiscoverError::ImageError(format!(
                "Image path not found: {}",
                reference
            )));
        }

        if let Some(daemon) = &self.daemon {
            if daemon.has_image(reference).await {
                tracing::info!(image = reference, "Using image from local Docker daemon");
                return daemon.export(reference, workspace).await;
            }
        }

        let image_ref = ImageReference::parse(reference)?;
        tracing::info!(image = %image_ref, "Pulling image from registry");
        let puller = RegistryPuller::with_auth(self.auth.clone());
        let layout = puller.pull(&image_ref, &workspace.join("layout")).await?;
        Self::from_layout(&layout, workspace)
    }
}

/// Whether `reference` can only mean a local file.
fn looks_like_path(reference: &str) -> bool {
    reference.starts_with('/')
        || reference.starts_with("./")
        || reference.starts_with("../")
        || [".tar", ".tar.gz", ".tgz"]
            .iter()
            .any(|ext| reference.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::image::tests::write_oci_layout;
    use crate::oci::layers::tests::write_layer;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_materialize_rootfs_dir() {
        let image = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        fs::create_dir_all(image.path().join("opt")).unwrap();

        let rootfs = DefaultMaterializer::with_auth(RegistryAuth::anonymous())
            .materialize(image.path().to_str().unwrap(), workspace.path())
            .await
            .unwrap();
        assert_eq!(rootfs, image.path());
    }

    #[tokio::test]
    async fn test_materialize_oci_layout_dir() {
        let image = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        write_oci_layout(image.path(), &["l1", "l2"]);
        write_layer(&image.path().join("blobs/sha256/l1"), &[("opt/tool/bin", "v1")], true);
        write_layer(&image.path().join("blobs/sha256/l2"), &[("opt/tool/bin", "v2")], true);

        let rootfs = DefaultMaterializer::with_auth(RegistryAuth::anonymous())
            .materialize(image.path().to_str().unwrap(), workspace.path())
            .await
            .unwrap();
        assert_eq!(rootfs, workspace.path().join("rootfs"));
        assert_eq!(fs::read_to_string(rootfs.join("opt/tool/bin")).unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_materialize_docker_save_archive() {
        let staging = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();

        let layer = staging.path().join("layer.tar");
        write_layer(&layer, &[("usr/local/bin/tool", "bin")], false);
        let manifest = r#"[{"Config":"c.json","RepoTags":["app:1"],"Layers":["abc/layer.tar"]}]"#;

        let archive = staging.path().join("image.tar");
        let mut builder = tar::Builder::new(fs::File::create(&archive).unwrap());
        builder
            .append_path_with_name(&layer, "abc/layer.tar")
            .unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "manifest.json", manifest.as_bytes())
            .unwrap();
        builder.finish().unwrap();
        drop(builder);

        let rootfs = DefaultMaterializer::with_auth(RegistryAuth::anonymous())
            .materialize(archive.to_str().unwrap(), workspace.path())
            .await
            .unwrap();
        assert!(rootfs.join("usr/local/bin/tool").is_file());
    }

    #[tokio::test]
    async fn test_materialize_flat_export() {
        let staging = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let archive = staging.path().join("export.tar.gz");
        write_layer(&archive, &[("etc/os-release", "ID=alpine")], true);

        let rootfs = DefaultMaterializer::with_auth(RegistryAuth::anonymous())
            .materialize(archive.to_str().unwrap(), workspace.path())
            .await
            .unwrap();
        assert_eq!(rootfs, workspace.path().join("archive"));
        assert!(rootfs.join("etc/os-release").is_file());
    }

    #[tokio::test]
    async fn test_materialize_missing_path() {
        let workspace = TempDir::new().unwrap();
        let result = DefaultMaterializer::with_auth(RegistryAuth::anonymous())
            .materialize("/definitely/not/here.tar", workspace.path())
            .await;
        assert!(matches!(result, Err(DiscoverError::ImageError(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_materialize_prefers_local_daemon() {
        use crate::oci::daemon::tests::fake_docker;

        let staging = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let export = staging.path().join("export.fixture");
        write_layer(&export, &[("opt/tool/bin/tool", "local build")], false);
        let docker = fake_docker(staging.path(), &export);

        let rootfs = DefaultMaterializer::with_auth(RegistryAuth::anonymous())
            .with_daemon(Some(DockerDaemon::new(docker)))
            .materialize("app:dev", workspace.path())
            .await
            .unwrap();
        assert_eq!(
            fs::read_to_string(rootfs.join("opt/tool/bin/tool")).unwrap(),
            "local build"
        );
    }

    #[test]
    fn test_looks_like_path() {
        assert!(looks_like_path("./image.tar"));
        assert!(looks_like_path("/srv/rootfs"));
        assert!(looks_like_path("app.tgz"));
        assert!(!looks_like_path("alpine:3.19"));
        assert!(!looks_like_path("ghcr.io/org/tool@sha256:abc"));
    }
}
