//! Error types for the ACL engine
//!
//! All fallible operations in the crate return [`AclResult`]. Configuration
//! problems are reported at load time and are fatal to the permission or
//! policy being built; predicate failures raised while a request is being
//! authorized are caught by the registry and turned into non-matches.

/// Unified error type for the ACL engine
#[derive(Debug, thiserror::Error)]
pub enum AclError {
    /// Malformed permission, filter, projection, blacklist or predicate
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An aggregation pipeline violated the security policy
    #[error("{0}")]
    Security(String),

    /// A predicate failed while being evaluated against a request
    #[error("Predicate evaluation error: {0}")]
    Predicate(String),

    /// The predicate language rejected an expression
    #[error("Predicate parse error: {0}")]
    Parse(String),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AclError {
    /// Create a configuration error with context
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a security error with context
    pub fn security<S: Into<String>>(msg: S) -> Self {
        Self::Security(msg.into())
    }

    /// Create a predicate evaluation error with context
    pub fn predicate<S: Into<String>>(msg: S) -> Self {
        Self::Predicate(msg.into())
    }

    /// Create a parse error with context
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    /// Check if this error was raised while loading configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AclError::Configuration(_) | AclError::Toml(_) | AclError::Json(_) | AclError::Parse(_)
        )
    }
}

/// Result type alias for ACL operations
pub type AclResult<T> = Result<T, AclError>;
