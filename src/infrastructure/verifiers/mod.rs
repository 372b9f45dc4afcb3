pub mod noop;
pub mod turnstile;

use crate::domain::models::VerifierBox;

pub struct VerifierManager {}

impl VerifierManager {
    /// Uses Turnstile when a secret is configured, otherwise accepts any
    /// non-empty token.
    pub fn get(secret: &str) -> VerifierBox {
        if secret.is_empty() {
            tracing::warn!("No verification secret configured, tokens are not checked");
            return Box::<noop::NoopVerifier>::default();
        }

        return Box::<turnstile::Turnstile>::default();
    }
}
