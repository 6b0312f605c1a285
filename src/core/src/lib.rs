//! addontrace core - foundational types shared by the engine and the CLI.
//!
//! Holds the provenance data model (build stages, install traces, verified
//! artifacts), the discovery configuration and the error taxonomy.

pub mod config;
pub mod error;
pub mod model;

// Re-export commonly used types
pub use config::{DiscoverConfig, OutputFormat};
pub use error::{DiscoverError, Result};
pub use model::{
    BuildStage, CommandSet, ContentHash, DockerfileReport, ImageRef, InstallTrace, Trace,
    VerificationReport, VerifiedArtifact,
};

/// addontrace version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
