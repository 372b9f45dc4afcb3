#[cfg(test)]
#[path = "turnstile_test.rs"]
mod tests;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::TokenVerifier;

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SiteVerifyRequest {
    secret: String,
    response: String,
    remoteip: String,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

/// Checks tokens against Cloudflare Turnstile's siteverify API.
pub struct Turnstile {
    url: String,
    secret: String,
}

impl Default for Turnstile {
    fn default() -> Turnstile {
        return Turnstile {
            url: Config::get(ConfigKey::TurnstileURL),
            secret: Config::get(ConfigKey::TurnstileSecret),
        };
    }
}

#[async_trait]
impl TokenVerifier for Turnstile {
    #[allow(clippy::implicit_return)]
    async fn verify(&self, token: &str, remote_addr: &str) -> Result<bool> {
        let req = SiteVerifyRequest {
            secret: self.secret.to_string(),
            response: token.to_string(),
            remoteip: remote_addr.to_string(),
        };

        let res = reqwest::Client::new()
            .post(&self.url)
            .form(&req)
            .send()
            .await?;

        if !res.status().is_success() {
            tracing::error!(status = res.status().as_u16(), "Turnstile siteverify failed");
            bail!("Turnstile siteverify failed");
        }

        let body = res.json::<SiteVerifyResponse>().await?;
        if !body.success {
            tracing::info!(errors = ?body.error_codes, "Turnstile rejected token");
        }

        return Ok(body.success);
    }
}
