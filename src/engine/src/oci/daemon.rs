//! Images held by a local Docker daemon, read through the `docker` CLI.
//!
//! A throwaway container is created from the image, its filesystem is
//! exported as a flat tarball and unpacked into the workspace.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use addontrace_core::error::{DiscoverError, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::layers::apply_layer;
use super::materialize::ImageMaterializer;

/// Environment variable naming the docker binary to use.
pub const DOCKER_BINARY_ENV: &str = "ADDONTRACE_DOCKER";

/// Access to images of the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerDaemon {
    binary: PathBuf,
}

impl Default for DockerDaemon {
    fn default() -> Self {
        let binary = std::env::var_os(DOCKER_BINARY_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("docker"));
        Self::new(binary)
    }
}

impl DockerDaemon {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Whether the daemon holds `reference`. An unreachable daemon or a
    /// missing binary counts as "no".
    pub async fn has_image(&self, reference: &str) -> bool {
        match self.run(&["image", "inspect", reference]).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(image = reference, error = %e, "Image not available from Docker daemon");
                false
            }
        }
    }

    /// Export the filesystem of `reference` and unpack it to `workspace/rootfs`.
    pub async fn export(&self, reference: &str, workspace: &Path) -> Result<PathBuf> {
        let container = self.run(&["create", reference]).await?.trim().to_string();
        if container.is_empty() {
            return Err(DiscoverError::ImageError(format!(
                "docker create returned no container id for {}",
                reference
            )));
        }

        let tarball = workspace.join("export.tar");
        let tarball_arg = tarball.to_string_lossy().into_owned();
        let exported = self.run(&["export", "-o", &tarball_arg, &container]).await;
        if let Err(e) = self.run(&["rm", &container]).await {
            tracing::warn!(container = %container, error = %e, "Failed to remove export container");
        }
        exported?;

        let rootfs = workspace.join("rootfs");
        apply_layer(&tarball, &rootfs)?;
        if let Err(e) = std::fs::remove_file(&tarball) {
            tracing::debug!(path = %tarball.display(), error = %e, "Failed to remove export tarball");
        }

        tracing::info!(image = reference, rootfs = %rootfs.display(), "Exported image from Docker daemon");
        Ok(rootfs)
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DiscoverError::ImageError(format!(
                    "Failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(DiscoverError::ImageError(format!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ImageMaterializer for DockerDaemon {
    async fn materialize(&self, reference: &str, workspace: &Path) -> Result<PathBuf> {
        self.export(reference, workspace).await
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use crate::oci::layers::tests::write_layer;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in `docker` that knows one image, `app:dev`, whose export is
    /// the tarball at `export`.
    pub(crate) fn fake_docker(dir: &Path, export: &Path) -> PathBuf {
        let script = format!(
            "#!/bin/sh\n\
             case \"$1\" in\n\
               image) [ \"$3\" = \"app:dev\" ] ;;\n\
               create) [ \"$2\" = \"app:dev\" ] && echo c0ffee ;;\n\
               export) cp '{}' \"$3\" ;;\n\
               rm) exit 0 ;;\n\
               *) exit 1 ;;\n\
             esac\n",
            export.display()
        );
        let path = dir.join("docker");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let export = dir.path().join("export.fixture");
        write_layer(&export, &[("usr/local/bin/app", "built locally")], false);
        let docker = fake_docker(dir.path(), &export);
        (dir, docker)
    }

    #[tokio::test]
    async fn test_has_image() {
        let (_dir, docker) = fixture();
        let daemon = DockerDaemon::new(docker);
        assert!(daemon.has_image("app:dev").await);
        assert!(!daemon.has_image("other:1").await);
    }

    #[tokio::test]
    async fn test_missing_binary_has_no_images() {
        let daemon = DockerDaemon::new("/nonexistent/bin/docker");
        assert!(!daemon.has_image("app:dev").await);
    }

    #[tokio::test]
    async fn test_export_unpacks_container_filesystem() {
        let (_dir, docker) = fixture();
        let workspace = TempDir::new().unwrap();

        let rootfs = DockerDaemon::new(docker)
            .materialize("app:dev", workspace.path())
            .await
            .unwrap();
        assert_eq!(rootfs, workspace.path().join("rootfs"));
        assert_eq!(
            fs::read_to_string(rootfs.join("usr/local/bin/app")).unwrap(),
            "built locally"
        );
        assert!(!workspace.path().join("export.tar").exists());
    }

    #[tokio::test]
    async fn test_export_unknown_image_fails() {
        let (_dir, docker) = fixture();
        let workspace = TempDir::new().unwrap();

        let err = DockerDaemon::new(docker)
            .export("other:1", workspace.path())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoverError::ImageError(_)));
    }
}
