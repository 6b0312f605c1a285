use thiserror::Error;

/// addontrace error types
#[derive(Error, Debug)]
pub enum DiscoverError {
    /// Dockerfile could not be read or parsed
    #[error("Dockerfile error: {0}")]
    DockerfileError(String),

    /// Image reference could not be resolved or its filesystem materialized
    #[error("Image error: {0}")]
    ImageError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// A COPY/ADD instruction without a usable source/destination pair
    #[error("No trace can be produced: {0}")]
    NoTrace(String),

    /// SBOM encoding error
    #[error("SBOM error: {0}")]
    SbomError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DiscoverError {
    /// Whether this error aborts the whole discovery run.
    ///
    /// Per-instruction and per-artifact failures are skipped by the engine;
    /// only Dockerfile and image problems stop a run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DiscoverError::DockerfileError(_)
                | DiscoverError::ImageError(_)
                | DiscoverError::RegistryError { .. }
        )
    }
}

impl From<serde_json::Error> for DiscoverError {
    fn from(err: serde_json::Error) -> Self {
        DiscoverError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DiscoverError {
    fn from(err: serde_yaml::Error) -> Self {
        DiscoverError::SerializationError(err.to_string())
    }
}

/// Result type alias for addontrace operations
pub type Result<T> = std::result::Result<T, DiscoverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dockerfile_error_display() {
        let error = DiscoverError::DockerfileError("Line 3: Unknown instruction 'FORM'".to_string());
        assert_eq!(
            error.to_string(),
            "Dockerfile error: Line 3: Unknown instruction 'FORM'"
        );
    }

    #[test]
    fn test_image_error_display() {
        let error = DiscoverError::ImageError("layer blob missing".to_string());
        assert_eq!(error.to_string(), "Image error: layer blob missing");
    }

    #[test]
    fn test_registry_error_display() {
        let error = DiscoverError::RegistryError {
            registry: "ghcr.io".to_string(),
            message: "Authentication failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: ghcr.io - Authentication failed"
        );
    }

    #[test]
    fn test_no_trace_display() {
        let error = DiscoverError::NoTrace("COPY onlysource".to_string());
        assert_eq!(error.to_string(), "No trace can be produced: COPY onlysource");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: DiscoverError = io_error.into();
        assert!(matches!(error, DiscoverError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: DiscoverError = result.unwrap_err().into();
        assert!(matches!(error, DiscoverError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: DiscoverError = result.unwrap_err().into();
        assert!(matches!(error, DiscoverError::SerializationError(_)));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(DiscoverError::DockerfileError("x".to_string()).is_fatal());
        assert!(DiscoverError::ImageError("x".to_string()).is_fatal());
        assert!(!DiscoverError::NoTrace("x".to_string()).is_fatal());
        assert!(!DiscoverError::SbomError("x".to_string()).is_fatal());
    }
}
