#[cfg(test)]
#[path = "errors_test.rs"]
mod tests;

use thiserror::Error;

use super::ErrorBody;
use super::UsageSnapshot;

/// Every way a generation attempt can end without an answer.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Validation(String),

    #[error("Sign in to continue")]
    AuthRequired,

    #[error("Human verification failed: {0}")]
    VerificationFailed(String),

    #[error("Human verification expired")]
    VerificationExpired,

    #[error("Model {model_id} requires a premium plan")]
    PremiumRequired { model_id: String },

    #[error("Daily limit reached ({} of {} used)", .0.used, .0.limit)]
    QuotaExceeded(UsageSnapshot),

    #[error("{0}")]
    FloodControl(String),

    #[error("The request timed out")]
    Timeout,

    #[error("The request was cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl GenerationError {
    /// Errors that offer a retry which replays the last attempt.
    pub fn is_retryable(&self) -> bool {
        return matches!(
            self,
            GenerationError::Timeout | GenerationError::Network(_) | GenerationError::Server { .. }
        );
    }

    /// Errors logged as faults rather than expected user outcomes.
    pub fn is_system_fault(&self) -> bool {
        return self.is_retryable();
    }

    pub fn rearms_verification(&self) -> bool {
        return matches!(
            self,
            GenerationError::VerificationFailed(_) | GenerationError::VerificationExpired
        );
    }

    pub fn call_to_action(&self) -> String {
        match self {
            GenerationError::Validation(msg) => return msg.to_string(),
            GenerationError::AuthRequired => {
                return "Sign in to continue. Your prompt was saved and will be restored."
                    .to_string();
            }
            GenerationError::VerificationFailed(_) | GenerationError::VerificationExpired => {
                return "Verification did not complete. Submit again to retry the challenge."
                    .to_string();
            }
            GenerationError::PremiumRequired { model_id } => {
                return format!("{model_id} is available on the premium plan. Upgrade or pick another model with /model.");
            }
            GenerationError::QuotaExceeded(usage) => {
                let mut msg = format!(
                    "You have used {used} of {limit} requests today ({remaining} remaining).",
                    used = usage.used,
                    limit = usage.limit,
                    remaining = usage.remaining
                );
                if usage.user_type == super::UserType::Guest {
                    msg += " Sign in for a higher limit.";
                } else {
                    msg += " Wait until tomorrow or upgrade your plan.";
                }
                return msg;
            }
            GenerationError::FloodControl(msg) => return msg.to_string(),
            GenerationError::Cancelled => return "Generation cancelled.".to_string(),
            GenerationError::Timeout
            | GenerationError::Network(_)
            | GenerationError::Server { .. } => {
                return format!("{self}. Use /retry to send the last prompt again.");
            }
        }
    }
}

/// Maps a non-success generation response to the error taxonomy. The 403
/// and 429 cases are told apart by payload shape.
pub fn classify_rejection(status: u16, body: &str) -> GenerationError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let message = match &parsed {
        Some(err_body) if !err_body.error.is_empty() => err_body.error.to_string(),
        _ => body.trim().to_string(),
    };

    match status {
        400 => return GenerationError::Validation(message),
        401 => return GenerationError::AuthRequired,
        403 => {
            if let Some(err_body) = &parsed {
                if err_body.requires_upgrade == Some(true) {
                    return GenerationError::PremiumRequired {
                        model_id: err_body.model_id.clone().unwrap_or_default(),
                    };
                }
            }
            return GenerationError::VerificationFailed(message);
        }
        429 => {
            if let Some(usage) = parsed.and_then(|err_body| return err_body.usage_info) {
                return GenerationError::QuotaExceeded(usage);
            }
            return GenerationError::FloodControl(message);
        }
        _ => return GenerationError::Server { status, message },
    }
}
