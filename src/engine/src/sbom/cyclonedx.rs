//! CycloneDX 1.4 JSON documents.

use addontrace_core::error::{DiscoverError, Result};
use addontrace_core::{ContentHash, VerifiedArtifact};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{SbomEncoder, SbomInput, MANUAL_REVIEW_NOTE, TOOL_NAME};
use crate::verify::dirhash::FILE_HASH_PREFIX;

const SPEC_VERSION: &str = "1.4";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Bom {
    bom_format: &'static str,
    spec_version: &'static str,
    serial_number: String,
    version: u32,
    metadata: Metadata,
    components: Vec<Component>,
}

#[derive(Debug, Serialize)]
struct Metadata {
    timestamp: String,
    tools: Vec<Tool>,
    component: Component,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    properties: Vec<Property>,
}

#[derive(Debug, Serialize)]
struct Tool {
    vendor: &'static str,
    name: &'static str,
    version: String,
}

#[derive(Debug, Default, Serialize)]
struct Component {
    #[serde(rename = "bom-ref", skip_serializing_if = "Option::is_none")]
    bom_ref: Option<String>,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    supplier: Option<Supplier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    hashes: Vec<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purl: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    properties: Vec<Property>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    components: Vec<Component>,
}

#[derive(Debug, Serialize)]
struct Supplier {
    url: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Hash {
    alg: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct Property {
    name: String,
    value: String,
}

impl Property {
    fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: format!("{}:{}", TOOL_NAME, name),
            value: value.into(),
        }
    }
}

/// Writes CycloneDX 1.4 JSON.
///
/// The image is the top component. Downloaded artifacts are grouped under
/// one `application` component per download location; artifacts copied in
/// with COPY/ADD sit directly under the image.
pub struct CycloneDxEncoder;

impl SbomEncoder for CycloneDxEncoder {
    fn encode(&self, input: &SbomInput<'_>) -> Result<String> {
        let bom = build_bom(input);
        serde_json::to_string_pretty(&bom)
            .map_err(|e| DiscoverError::SbomError(format!("Failed to encode CycloneDX: {}", e)))
    }
}

fn build_bom(input: &SbomInput<'_>) -> Bom {
    let image_name = input.image.name.clone();
    let image_version = (!input.image.tag.is_empty()).then(|| input.image.tag.clone());
    let image_ref = format!("image:{}", input.image);

    let mut image = Component {
        bom_ref: Some(image_ref.clone()),
        kind: "container",
        name: image_name.clone(),
        version: image_version.clone(),
        purl: input.image.digest.clone(),
        ..Default::default()
    };

    if let Some(os) = &input.os {
        image.components.push(Component {
            bom_ref: Some(format!("os:{}@{}", os.id, os.version_id)),
            kind: "operating-system",
            name: os.id.clone(),
            version: Some(os.version_id.clone()),
            ..Default::default()
        });
    }

    let mut downloads: Vec<Component> = Vec::new();
    for artifact in &input.report.artifacts {
        if !artifact.is_download {
            image
                .components
                .push(artifact_component(artifact, &artifact.download_location));
            continue;
        }

        let location = &artifact.download_location;
        let group = download_name(location);
        let component = artifact_component(artifact, &group);
        match downloads
            .iter_mut()
            .find(|d| d.purl.as_deref() == Some(location.as_str()))
        {
            Some(download) => download.components.push(component),
            None => downloads.push(Component {
                kind: "application",
                supplier: Some(Supplier {
                    url: vec![location.clone()],
                }),
                name: group,
                purl: Some(location.clone()),
                components: vec![component],
                ..Default::default()
            }),
        }
    }
    image.components.extend(downloads);

    let mut properties = vec![Property::new("dockerfile", input.dockerfile)];
    if !input.namespace.is_empty() {
        properties.push(Property::new("namespace", input.namespace));
    }
    for trace in &input.report.manual_review {
        properties.push(Property::new(
            "manual-review",
            format!("{} {} -> {}", trace.command, trace.source, trace.destination),
        ));
    }

    Bom {
        bom_format: "CycloneDX",
        spec_version: SPEC_VERSION,
        serial_number: format!("urn:uuid:{}", Uuid::new_v4()),
        version: 1,
        metadata: Metadata {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            tools: vec![Tool {
                vendor: TOOL_NAME,
                name: TOOL_NAME,
                version: input.tool_version.to_string(),
            }],
            component: Component {
                bom_ref: Some(image_ref),
                kind: "container",
                name: image_name,
                version: image_version,
                ..Default::default()
            },
            properties,
        },
        components: vec![image],
    }
}

/// `https://host/path` becomes `host/path`.
fn download_name(location: &str) -> String {
    match location.find("://") {
        Some(pos) => location[pos + 3..].to_string(),
        None => location.to_string(),
    }
}

fn artifact_component(artifact: &VerifiedArtifact, group: &str) -> Component {
    let supplier = (!artifact.download_location.is_empty()).then(|| Supplier {
        url: vec![artifact.download_location.clone()],
    });

    let mut properties = vec![
        Property::new("path", artifact.path.clone()),
        Property::new("command", artifact.command.clone()),
    ];
    match &artifact.hash {
        ContentHash::Digest(digest) if artifact.is_directory => {
            properties.push(Property::new("dirhash", digest.clone()))
        }
        ContentHash::Digest(_) => {}
        ContentHash::Unavailable => properties.push(Property::new("review", MANUAL_REVIEW_NOTE)),
    }
    if let Some(comment) = &artifact.comment {
        properties.push(Property::new("comment", comment.clone()));
    }

    if artifact.is_directory {
        return Component {
            kind: "application",
            supplier,
            group: Some(group.to_string()),
            name: artifact.name.clone(),
            purl: (artifact.is_download).then(|| artifact.download_location.clone()),
            properties,
            ..Default::default()
        };
    }

    let sha256 = artifact
        .hash
        .digest()
        .and_then(|d| d.strip_prefix(FILE_HASH_PREFIX))
        .map(String::from);
    Component {
        bom_ref: Some(format!("file:{}", artifact.path)),
        kind: "file",
        supplier,
        group: Some(group.to_string()),
        name: artifact.name.clone(),
        version: sha256.clone(),
        hashes: sha256
            .map(|content| Hash {
                alg: "SHA-256",
                content,
            })
            .into_iter()
            .collect(),
        properties,
        ..Default::default()
    }
}
