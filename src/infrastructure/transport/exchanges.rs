#[cfg(test)]
#[path = "exchanges_test.rs"]
mod tests;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ChatExchange;
use crate::domain::models::ExchangeStore;
use crate::domain::models::SaveResponse;

pub struct HttpExchangeStore {
    url: String,
}

impl Default for HttpExchangeStore {
    fn default() -> HttpExchangeStore {
        return HttpExchangeStore::new(&Config::get(ConfigKey::EndpointURL));
    }
}

impl HttpExchangeStore {
    pub fn new(url: &str) -> HttpExchangeStore {
        return HttpExchangeStore {
            url: url.trim_end_matches('/').to_string(),
        };
    }
}

#[async_trait]
impl ExchangeStore for HttpExchangeStore {
    #[allow(clippy::implicit_return)]
    async fn save(&self, exchange: &ChatExchange) -> Result<SaveResponse> {
        let res = reqwest::Client::new()
            .post(format!("{url}/api/exchanges", url = self.url))
            .json(&exchange.to_body())
            .send()
            .await?;

        if !res.status().is_success() {
            tracing::error!(status = res.status().as_u16(), "Failed to save exchange");
            bail!(format!("Saving the exchange failed with status {}", res.status()));
        }

        return Ok(res.json::<SaveResponse>().await?);
    }
}
