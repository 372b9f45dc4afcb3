#[cfg(test)]
#[path = "http_test.rs"]
mod tests;

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use futures::StreamExt;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::GenerationBody;
use crate::domain::models::GenerationError;
use crate::domain::models::GenerationResponse;
use crate::domain::models::GenerationTransport;

fn convert_err(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        return GenerationError::Timeout;
    }

    return GenerationError::Network(err.to_string());
}

/// Posts generation requests to the endpoint over HTTP and hands back the
/// response body as a byte stream.
pub struct HttpGenerationTransport {
    url: String,
    client: reqwest::Client,
}

impl Default for HttpGenerationTransport {
    fn default() -> HttpGenerationTransport {
        return HttpGenerationTransport::new(&Config::get(ConfigKey::EndpointURL));
    }
}

impl HttpGenerationTransport {
    pub fn new(url: &str) -> HttpGenerationTransport {
        return HttpGenerationTransport {
            url: url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        };
    }
}

#[async_trait]
impl GenerationTransport for HttpGenerationTransport {
    #[allow(clippy::implicit_return)]
    async fn send(&self, body: &GenerationBody) -> Result<GenerationResponse, GenerationError> {
        let res = self
            .client
            .post(format!("{url}/api/generate", url = self.url))
            .json(body)
            .send()
            .await
            .map_err(convert_err)?;

        let status = res.status().as_u16();
        tracing::debug!(status, "Generation response started");

        return Ok(GenerationResponse {
            status,
            body: res.bytes_stream().map_err(convert_err).boxed(),
        });
    }
}
