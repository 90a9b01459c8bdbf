//! Comprehensive error types for the logical-replication CDC pipeline
//! Provides structured error handling using thiserror for better error reporting

use thiserror::Error;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Database connection related errors
    #[error("database connection error: {message}")]
    Connection {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration related errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Message parsing errors
    #[error("message parsing error: {message}")]
    MessageParsing {
        message: String,
        context: Option<String>,
    },

    /// Protocol errors
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        context: Option<String>,
    },

    /// Buffer operation errors
    #[error("buffer operation error: {message}")]
    BufferOperation { message: String },

    /// Network/IO related errors
    #[error("network IO error")]
    NetworkIO(#[from] std::io::Error),

    /// String conversion errors
    #[error("string conversion error")]
    StringConversion(#[from] std::string::FromUtf8Error),

    /// C string conversion errors
    #[error("C string conversion error")]
    CStringConversion(#[from] std::ffi::NulError),

    /// Task execution errors for async operations
    #[error("task execution error")]
    TaskExecution(#[from] tokio::task::JoinError),

    /// A connector was asked to perform an operation its declared type does
    /// not support (e.g. `publish` on a SubOnly peer).
    #[error("connector '{peer}' does not support {operation} (type is {declared_type})")]
    ConnectorTypeMismatch {
        peer: String,
        operation: &'static str,
        declared_type: &'static str,
    },

    /// A sink (or source) peer failed to connect, publish, or subscribe.
    #[error("connector error on peer '{peer}': {message}")]
    Connector { peer: String, message: String },

    /// A pipeline referenced a peer name that was never registered, or used
    /// a peer in a role its type does not support.
    #[error("pipeline '{pipeline}' is invalid: {message}")]
    PipelineConfiguration { pipeline: String, message: String },

    /// A transformation's configuration failed validation before the chain
    /// was built.
    #[error("transformation '{transform_type}' configuration invalid: {message}")]
    TransformationValidation {
        transform_type: String,
        message: String,
    },

    /// A transformation failed at runtime (distinct from validation, which
    /// happens once at pipeline-build time).
    #[error("transformation '{transform_type}' failed: {message}")]
    TransformationRuntime {
        transform_type: String,
        message: String,
    },

    /// Generic error for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for convenience
pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;

impl ReplicationError {
    /// Create a connection error with context
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a message parsing error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::MessageParsing {
            message: message.into(),
            context: None,
        }
    }

    /// Create a message parsing error with context
    pub fn parse_with_context<S: Into<String>, C: Into<String>>(message: S, context: C) -> Self {
        Self::MessageParsing {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
            context: None,
        }
    }

    /// Create a buffer operation error
    pub fn buffer<S: Into<String>>(message: S) -> Self {
        Self::BufferOperation {
            message: message.into(),
        }
    }

    /// Create a connector-contract mismatch error
    pub fn connector_mismatch<S: Into<String>>(
        peer: S,
        operation: &'static str,
        declared_type: &'static str,
    ) -> Self {
        Self::ConnectorTypeMismatch {
            peer: peer.into(),
            operation,
            declared_type,
        }
    }

    /// Create a connector operation error
    pub fn connector<S: Into<String>, M: Into<String>>(peer: S, message: M) -> Self {
        Self::Connector {
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Create a pipeline configuration error
    pub fn pipeline<S: Into<String>, M: Into<String>>(pipeline: S, message: M) -> Self {
        Self::PipelineConfiguration {
            pipeline: pipeline.into(),
            message: message.into(),
        }
    }

    /// Create a transformation validation error
    pub fn transform_validation<S: Into<String>, M: Into<String>>(
        transform_type: S,
        message: M,
    ) -> Self {
        Self::TransformationValidation {
            transform_type: transform_type.into(),
            message: message.into(),
        }
    }

    /// Create a transformation runtime error
    pub fn transform_runtime<S: Into<String>, M: Into<String>>(
        transform_type: S,
        message: M,
    ) -> Self {
        Self::TransformationRuntime {
            transform_type: transform_type.into(),
            message: message.into(),
        }
    }

    /// Whether this error represents a fatal condition for the owning
    /// session/task, as opposed to one that should be isolated to a single
    /// event or sink (see the error taxonomy table in the design docs).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Configuration { .. } | Self::Protocol { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ReplicationError::connection("down").is_fatal());
        assert!(ReplicationError::config("bad").is_fatal());
        assert!(!ReplicationError::connector("http", "timed out").is_fatal());
        assert!(!ReplicationError::transform_runtime("extract", "boom").is_fatal());
    }

    #[test]
    fn constructors_roundtrip_message() {
        let err = ReplicationError::parse_with_context("bad marker", "column 3");
        match err {
            ReplicationError::MessageParsing { message, context } => {
                assert_eq!(message, "bad marker");
                assert_eq!(context.as_deref(), Some("column 3"));
            }
            _ => panic!("wrong variant"),
        }
    }
}
