use std::time::Duration;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use strum::EnumIter;
use strum::EnumVariantNames;

/// Single-use proof of a passed human-verification challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationToken {
    pub value: String,
    expires_at: Instant,
}

impl VerificationToken {
    pub fn new(value: &str, ttl: Duration) -> VerificationToken {
        return VerificationToken {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
    }

    pub fn is_expired(&self) -> bool {
        return Instant::now() >= self.expires_at;
    }
}

/// Terminal outcomes of one challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Verified(String),
    Error(String),
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, EnumVariantNames, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum WidgetName {
    Prompt,
    Static,
}

impl WidgetName {
    pub fn parse(text: &str) -> Option<WidgetName> {
        use strum::IntoEnumIterator;
        return WidgetName::iter().find(|e| return e.to_string() == text);
    }
}

/// Client side of a human-verification challenge.
#[async_trait]
pub trait VerificationWidget {
    fn name(&self) -> WidgetName;

    /// Shows a challenge and waits for one of its terminal outcomes.
    async fn challenge(&self) -> ChallengeOutcome;
}

pub type WidgetBox = Box<dyn VerificationWidget + Send + Sync>;

/// Server side check of a token presented with a generation request.
#[async_trait]
pub trait TokenVerifier {
    async fn verify(&self, token: &str, remote_addr: &str) -> Result<bool>;
}

pub type VerifierBox = Box<dyn TokenVerifier + Send + Sync>;
