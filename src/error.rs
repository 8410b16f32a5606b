//! Crate-level error type

use crate::providers::ProviderError;
use crate::storage::StorageError;
use crate::tools::ExecutionStatus;
use thiserror::Error;

/// Result alias used across the core services
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the core services to request handlers
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Tool '{0}' is not active")]
    ToolInactive(String),

    #[error("Approval {0} has already been resolved")]
    AlreadyResolved(uuid::Uuid),

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("Invalid execution transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("{service} service error: {message}")]
    ExternalService { service: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidTransition { .. } => "VALIDATION_ERROR",
            Self::ToolInactive(_) => "TOOL_INACTIVE",
            Self::AlreadyResolved(_) => "ALREADY_RESOLVED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Storage(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the caller caused the error (4xx-equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InvalidTransition { .. }
                | Self::ToolInactive(_)
                | Self::AlreadyResolved(_)
                | Self::NotFound { .. }
        )
    }
}

impl From<ProviderError> for CoreError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NoProvider(model) => {
                Self::Validation(format!("Unsupported model: {}", model))
            }
            other => Self::external("llm", other.to_string()),
        }
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
