//! Error types for matrix configuration, expansion and execution.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("config error: no axes declared")]
    NoAxes,

    #[error("config error: axis '{axis}' declares no values")]
    EmptyAxis { axis: String },

    #[error("config error: axis '{axis}' declared more than once")]
    DuplicateAxis { axis: String },

    #[error("config error: axes '{first}' and '{second}' both map to ${var}")]
    EnvVarCollision {
        first: String,
        second: String,
        var: String,
    },

    #[error("config error: {0}")]
    InvalidConfig(String),

    #[error("config error: build step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },

    #[error("config error: schedule '{name}': {reason}")]
    InvalidSchedule { name: String, reason: String },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid combination state transition: {current} -> {requested}")]
    InvalidStateTransition { current: String, requested: String },

    #[error("marker store error: {0}")]
    MarkerStore(String),
}

impl MatrixError {
    /// Whether this error belongs to the `ConfigError` class (fatal before any run starts).
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            MatrixError::NoAxes
                | MatrixError::EmptyAxis { .. }
                | MatrixError::DuplicateAxis { .. }
                | MatrixError::EnvVarCollision { .. }
                | MatrixError::InvalidConfig(_)
                | MatrixError::InvalidStep { .. }
                | MatrixError::InvalidSchedule { .. }
                | MatrixError::Yaml(_)
        )
    }
}

/// Result type for matrix operations
pub type Result<T> = std::result::Result<T, MatrixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_axes_message() {
        assert_eq!(MatrixError::NoAxes.to_string(), "config error: no axes declared");
    }

    #[test]
    fn test_config_error_classification() {
        assert!(MatrixError::NoAxes.is_config_error());
        assert!(MatrixError::EmptyAxis {
            axis: "python".to_string()
        }
        .is_config_error());
        assert!(MatrixError::EnvVarCollision {
            first: "dse-graph".to_string(),
            second: "dse_graph".to_string(),
            var: "DSE_GRAPH_VERSION".to_string(),
        }
        .is_config_error());
        assert!(!MatrixError::MarkerStore("disk full".to_string()).is_config_error());
        assert!(!MatrixError::InvalidStateTransition {
            current: "SUCCEEDED".to_string(),
            requested: "RUNNING".to_string(),
        }
        .is_config_error());
    }
}
