//! Unified error type for fileforge.
//!
//! All crates funnel their failures into [`Error`]. Configuration failures
//! (unknown operations, bad parameters) are distinguished from operational
//! ones via [`Error::is_configuration`], since a pipeline run treats the two
//! tiers differently.

use std::fmt;

/// Unified error type covering all failure modes in fileforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "pipeline", "service").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A service definition or operation declaration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation was declared without a parameter it requires.
    #[error("Operation '{operation}' is missing required parameter '{param}'")]
    MissingParam {
        /// The operation being constructed.
        operation: String,
        /// The parameter that was not supplied.
        param: String,
    },

    /// A parameter value could not be resolved from its source.
    #[error("Parameter error [{name}]: {message}")]
    Param {
        /// Parameter name.
        name: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool returned an error or could not be started.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Image decoding or encoding failed.
    #[error("Image error: {0}")]
    Image(String),

    /// A pipeline step failed.
    #[error("Pipeline error [{step}]: {message}")]
    Pipeline {
        /// The pipeline step that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error belongs to the configuration tier: fatal to a run
    /// and raised before any item is processed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::MissingParam { .. } | Error::Param { .. }
        )
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Convenience constructor for [`Error::MissingParam`].
    pub fn missing_param(operation: impl Into<String>, param: impl Into<String>) -> Self {
        Error::MissingParam {
            operation: operation.into(),
            param: param.into(),
        }
    }

    /// Convenience constructor for [`Error::Param`].
    pub fn param(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Param {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Pipeline`].
    pub fn pipeline(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Pipeline {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("pipeline", "thumbnails");
        assert_eq!(err.to_string(), "pipeline not found: thumbnails");
        assert!(!err.is_configuration());
    }

    #[test]
    fn config_display() {
        let err = Error::config("unknown operation: frobnicate");
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown operation: frobnicate"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn missing_param_display() {
        let err = Error::missing_param("size_validate", "max");
        assert_eq!(
            err.to_string(),
            "Operation 'size_validate' is missing required parameter 'max'"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn param_is_configuration() {
        let err = Error::param("token", "environment variable TOKEN is not set");
        assert_eq!(
            err.to_string(),
            "Parameter error [token]: environment variable TOKEN is not set"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert!(!err.is_configuration());
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("convert", "not found in PATH");
        assert_eq!(err.to_string(), "Tool error [convert]: not found in PATH");
    }

    #[test]
    fn pipeline_display() {
        let err = Error::pipeline("exec", "command exited with status 1");
        assert_eq!(
            err.to_string(),
            "Pipeline error [exec]: command exited with status 1"
        );
        assert!(!err.is_configuration());
    }
}
