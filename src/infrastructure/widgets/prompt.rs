#[cfg(test)]
#[path = "prompt_test.rs"]
mod tests;

use std::io;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use owo_colors::OwoColorize;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ChallengeOutcome;
use crate::domain::models::VerificationWidget;
use crate::domain::models::WidgetName;
use crate::infrastructure::terminal::next_line;
use crate::infrastructure::terminal::SharedLines;
use crate::infrastructure::terminal::STDIN_LINES;

/// Asks the user to paste the token from a challenge solved in the browser.
pub struct PromptWidget {
    endpoint_url: String,
    wait: Duration,
    lines: SharedLines,
}

impl Default for PromptWidget {
    fn default() -> PromptWidget {
        return PromptWidget {
            endpoint_url: Config::get(ConfigKey::EndpointURL),
            wait: Duration::from_millis(Config::get_u64(ConfigKey::VerificationTTL)),
            lines: STDIN_LINES.clone(),
        };
    }
}

#[async_trait]
impl VerificationWidget for PromptWidget {
    fn name(&self) -> WidgetName {
        return WidgetName::Prompt;
    }

    #[allow(clippy::implicit_return)]
    async fn challenge(&self) -> ChallengeOutcome {
        let prompt = format!(
            "Solve the verification challenge at {}/verify and paste the token:",
            self.endpoint_url
        );
        print!("{} ", prompt.yellow());
        if let Err(err) = io::stdout().flush() {
            tracing::debug!(error = ?err, "Failed to flush verification prompt");
        }

        let line = match tokio::time::timeout(self.wait, next_line(&self.lines)).await {
            Ok(line) => line,
            Err(_) => return ChallengeOutcome::Expired,
        };

        match line {
            Ok(Some(token)) if !token.trim().is_empty() => {
                return ChallengeOutcome::Verified(token.trim().to_string());
            }
            Ok(Some(_)) => return ChallengeOutcome::Error("No token was entered".to_string()),
            Ok(None) => {
                return ChallengeOutcome::Error("Input closed before a token was entered".to_string())
            }
            Err(err) => return ChallengeOutcome::Error(err.to_string()),
        }
    }
}
