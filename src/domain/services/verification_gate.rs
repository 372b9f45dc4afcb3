#[cfg(test)]
#[path = "verification_gate_test.rs"]
mod tests;

use std::time::Duration;

use crate::domain::models::ChallengeOutcome;
use crate::domain::models::VerificationToken;
use crate::domain::models::WidgetBox;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Pending,
    Verified,
    Failed(String),
    Expired,
}

/// Owns the single-use verification token for one orchestrator.
pub struct VerificationGate {
    widget: WidgetBox,
    state: GateState,
    token: Option<VerificationToken>,
    token_ttl: Duration,
}

impl VerificationGate {
    pub fn new(widget: WidgetBox, token_ttl: Duration) -> VerificationGate {
        return VerificationGate {
            widget,
            state: GateState::Idle,
            token: None,
            token_ttl,
        };
    }

    pub fn state(&self) -> GateState {
        return self.state.clone();
    }

    /// Runs one challenge and records its outcome.
    pub async fn acquire(&mut self) -> GateState {
        self.token = None;
        self.state = GateState::Pending;

        match self.widget.challenge().await {
            ChallengeOutcome::Verified(value) => {
                self.token = Some(VerificationToken::new(&value, self.token_ttl));
                self.state = GateState::Verified;
            }
            ChallengeOutcome::Error(reason) => {
                tracing::info!(widget = %self.widget.name(), reason = %reason, "Verification challenge failed");
                self.state = GateState::Failed(reason);
            }
            ChallengeOutcome::Expired => {
                tracing::info!(widget = %self.widget.name(), "Verification challenge expired");
                self.state = GateState::Expired;
            }
        }

        return self.state();
    }

    /// True when a token is held and has not timed out. An expired token is
    /// dropped and the gate moves to `Expired`.
    pub fn has_valid_token(&mut self) -> bool {
        if let Some(token) = &self.token {
            if !token.is_expired() {
                return true;
            }
            self.expire();
        }

        return false;
    }

    /// Hands the token to a generation attempt. The gate keeps no copy, so a
    /// token can never be presented twice.
    pub fn take_token(&mut self) -> Option<VerificationToken> {
        if !self.has_valid_token() {
            return None;
        }

        return self.token.take();
    }

    /// Expiry event from the widget for a token that was not used in time.
    pub fn expire(&mut self) {
        if self.token.take().is_some() || self.state == GateState::Pending {
            self.state = GateState::Expired;
        }
    }

    /// Discards any token and returns to `Idle`. Called after every consumed
    /// token whether or not the generation succeeded.
    pub fn reset(&mut self) {
        self.token = None;
        self.state = GateState::Idle;
    }
}
