use std::path::PathBuf;

use thiserror::Error;

/// Error type for gadget compilation and execution
#[derive(Error, Debug)]
pub enum GadgetError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("No resource: {0}")]
    NoResource(String),

    #[error("IO error: {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Step {index} [{step}] failed: {source}")]
    Step {
        index: usize,
        step: String,
        #[source]
        source: Box<GadgetError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GadgetError {
    /// Wrap an I/O error with the operation and path it failed on
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GadgetError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Strip any step-execution context
    pub fn root_cause(&self) -> &GadgetError {
        match self {
            GadgetError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether the underlying failure is a missing path
    pub fn is_not_found(&self) -> bool {
        match self.root_cause() {
            GadgetError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            GadgetError::NotFound(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, GadgetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_steps() {
        let inner = GadgetError::AlreadyExists("/tmp/x".to_string());
        let err = GadgetError::Step {
            index: 3,
            step: "mkdir! /tmp/x".to_string(),
            source: Box::new(inner),
        };
        assert!(matches!(err.root_cause(), GadgetError::AlreadyExists(_)));
        assert!(err.to_string().starts_with("Step 3 [mkdir! /tmp/x] failed"));
    }

    #[test]
    fn test_is_not_found() {
        let err = GadgetError::io(
            "remove",
            "/nope",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.is_not_found());
        assert!(!GadgetError::NoResource("udc".to_string()).is_not_found());
    }
}
