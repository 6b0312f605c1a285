//! addontrace engine - add-on discovery and verification.
//!
//! Reconstructs files added to a container image by shell commands and
//! COPY/ADD instructions, verifies them against the image filesystem, and
//! encodes the result as an SBOM.

#![allow(clippy::result_large_err)]

pub mod addon;
pub mod dockerfile;
pub mod engine;
pub mod oci;
pub mod report;
pub mod sbom;
pub mod verify;

// Re-export common types
pub use addon::{AddonDiscoverer, StageDiscovery, VariableScope, Verb};
pub use dockerfile::{split_stages, Dockerfile, Instruction, InstructionKind};
pub use engine::{discover_dockerfile, link_build_stages, Discovery, DiscoveryOutcome};
pub use oci::{DefaultMaterializer, DockerDaemon, ImageMaterializer, ImageReference, RegistryAuth};
pub use report::{load_trace_report, save_trace_report};
pub use sbom::{encoder_for, SbomEncoder, SbomInput};
pub use verify::{verify, Verifier};
