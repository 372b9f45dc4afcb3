use thiserror::Error;

use super::ErrorBody;
use super::UsageSnapshot;

/// Rejections produced by the generation endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("{0}")]
    VerificationFailed(String),

    #[error("Model {model_id} requires a premium plan")]
    PremiumRequired { model_id: String },

    #[error("Daily request limit reached")]
    QuotaExceeded(UsageSnapshot),

    #[error("{0}")]
    FloodControl(String),

    #[error("Upstream provider failed: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EndpointError {
    pub fn status(&self) -> u16 {
        match self {
            EndpointError::InvalidInput(_) => return 400,
            EndpointError::AuthRequired => return 401,
            EndpointError::VerificationFailed(_) | EndpointError::PremiumRequired { .. } => {
                return 403;
            }
            EndpointError::QuotaExceeded(_) | EndpointError::FloodControl(_) => return 429,
            EndpointError::Upstream(_) => return 503,
            EndpointError::Internal(_) => return 500,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let mut body = ErrorBody::message(&self.to_string());
        match self {
            EndpointError::PremiumRequired { model_id } => {
                body.requires_upgrade = Some(true);
                body.model_id = Some(model_id.to_string());
            }
            EndpointError::QuotaExceeded(usage) => {
                body.usage_info = Some(usage.clone());
            }
            _ => {}
        }

        return body;
    }
}
