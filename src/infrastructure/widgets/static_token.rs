#[cfg(test)]
#[path = "static_token_test.rs"]
mod tests;

use async_trait::async_trait;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ChallengeOutcome;
use crate::domain::models::VerificationWidget;
use crate::domain::models::WidgetName;

/// Answers every challenge with a token fixed in configuration. Meant for
/// scripted use against an endpoint with a test verification secret.
pub struct StaticWidget {
    token: String,
}

impl Default for StaticWidget {
    fn default() -> StaticWidget {
        return StaticWidget {
            token: Config::get(ConfigKey::VerificationToken),
        };
    }
}

#[async_trait]
impl VerificationWidget for StaticWidget {
    fn name(&self) -> WidgetName {
        return WidgetName::Static;
    }

    #[allow(clippy::implicit_return)]
    async fn challenge(&self) -> ChallengeOutcome {
        if self.token.is_empty() {
            return ChallengeOutcome::Error(format!(
                "No verification token configured, set {}",
                ConfigKey::VerificationToken
            ));
        }

        return ChallengeOutcome::Verified(self.token.to_string());
    }
}
