//! Domain errors for rating and billing runs.

use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BillingError {
    /// A rate component's configuration is missing or malformed.
    #[error("Invalid configuration for rate component '{component}': {message}")]
    Configuration { component: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The period is already BILLED; nothing was written.
    #[error("Billing period {period_id} has already been billed")]
    AlreadyBilled { period_id: Uuid },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] AppError),

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl BillingError {
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Label used for metrics and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::Configuration { .. } => "configuration",
            BillingError::NotFound(_) => "not_found",
            BillingError::AlreadyBilled { .. } => "already_billed",
            BillingError::Validation(_) => "validation",
            BillingError::Conflict(_) => "conflict",
            BillingError::Store(_) => "store",
            BillingError::Notification(_) => "notification",
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Store(inner) => inner,
            BillingError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            BillingError::AlreadyBilled { .. } | BillingError::Conflict(_) => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            BillingError::Configuration { .. } | BillingError::Validation(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            BillingError::Notification(msg) => AppError::EmailError(msg),
        }
    }
}

pub type Result<T, E = BillingError> = std::result::Result<T, E>;
