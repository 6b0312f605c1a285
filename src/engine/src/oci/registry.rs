//! Registry pulls.
//!
//! Uses the `oci-distribution` crate to fetch an image from a container
//! registry (Docker Hub, GHCR, etc.) into an OCI image layout on disk.

use std::path::{Path, PathBuf};

use addontrace_core::error::{DiscoverError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use tokio::io::AsyncWriteExt;

use super::reference::{ImageReference, DEFAULT_TAG};

/// Credentials for a container registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`, anonymous when
    /// either is unset.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME"),
            std::env::var("REGISTRY_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Pulls images from container registries.
pub struct RegistryPuller {
    client: Client,
    auth: RegistryAuth,
}

impl Default for RegistryPuller {
    fn default() -> Self {
        Self::with_auth(RegistryAuth::anonymous())
    }
}

impl RegistryPuller {
    pub fn with_auth(auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    /// Pull an image and write it as an OCI image layout to `target_dir`.
    ///
    /// Multi-arch indexes resolve to the linux manifest of the host
    /// architecture.
    pub async fn pull(&self, reference: &ImageReference, target_dir: &Path) -> Result<PathBuf> {
        let oci_ref = to_oci_reference(reference)?;
        let registry_error = |message: String| DiscoverError::RegistryError {
            registry: reference.registry.clone(),
            message,
        };

        tracing::info!(
            reference = %reference,
            target = %target_dir.display(),
            "Pulling image from registry"
        );

        let blobs_dir = target_dir.join("blobs").join("sha256");
        tokio::fs::create_dir_all(&blobs_dir)
            .await
            .map_err(|e| registry_error(format!("Failed to create blobs directory: {}", e)))?;

        let auth = self.auth.to_oci_auth();
        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| registry_error(format!("Failed to pull manifest: {}", e)))?;

        let manifest_json = serde_json::to_vec(&manifest)?;
        tokio::fs::write(blobs_dir.join(digest_hex(&manifest_digest)), &manifest_json)
            .await
            .map_err(|e| registry_error(format!("Failed to write manifest: {}", e)))?;

        self.pull_image_content(&oci_ref, &manifest, &blobs_dir, &reference.registry)
            .await?;

        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": manifest_digest,
                "size": manifest_json.len()
            }]
        });
        tokio::fs::write(
            target_dir.join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )
        .await
        .map_err(|e| registry_error(format!("Failed to write oci-layout: {}", e)))?;
        tokio::fs::write(
            target_dir.join("index.json"),
            serde_json::to_string_pretty(&index)?,
        )
        .await
        .map_err(|e| registry_error(format!("Failed to write index.json: {}", e)))?;

        tracing::info!(
            reference = %reference,
            digest = %manifest_digest,
            layers = manifest.layers.len(),
            "Image pulled"
        );

        Ok(target_dir.to_path_buf())
    }

    /// Stream the config and layer blobs of `manifest` into `blobs_dir`.
    async fn pull_image_content(
        &self,
        oci_ref: &Reference,
        manifest: &OciImageManifest,
        blobs_dir: &Path,
        registry: &str,
    ) -> Result<()> {
        self.pull_blob_to_file(oci_ref, &manifest.config, blobs_dir, registry)
            .await?;
        for layer in &manifest.layers {
            tracing::debug!(digest = %layer.digest, size = layer.size, "Pulling layer");
            self.pull_blob_to_file(oci_ref, layer, blobs_dir, registry)
                .await?;
        }
        Ok(())
    }

    async fn pull_blob_to_file(
        &self,
        oci_ref: &Reference,
        descriptor: &OciDescriptor,
        blobs_dir: &Path,
        registry: &str,
    ) -> Result<()> {
        let registry_error = |message: String| DiscoverError::RegistryError {
            registry: registry.to_string(),
            message,
        };

        let path = blobs_dir.join(digest_hex(&descriptor.digest));
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| registry_error(format!("Failed to create {}: {}", path.display(), e)))?;
        self.client
            .pull_blob(oci_ref, descriptor, &mut file)
            .await
            .map_err(|e| registry_error(format!("Failed to pull blob {}: {}", descriptor.digest, e)))?;
        file.flush()
            .await
            .map_err(|e| registry_error(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }
}

fn digest_hex(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

/// Convert an [`ImageReference`] to an oci-distribution [`Reference`].
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = match (&reference.digest, &reference.tag) {
        (Some(digest), _) => format!("{}/{}@{}", reference.registry, reference.repository, digest),
        (None, Some(tag)) => format!("{}/{}:{}", reference.registry, reference.repository, tag),
        (None, None) => format!(
            "{}/{}:{}",
            reference.registry, reference.repository, DEFAULT_TAG
        ),
    };

    ref_str.parse::<Reference>().map_err(|e| {
        DiscoverError::ImageError(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Pick the linux manifest matching the host architecture.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
