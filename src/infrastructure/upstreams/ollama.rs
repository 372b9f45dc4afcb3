#[cfg(test)]
#[path = "ollama_test.rs"]
mod tests;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::text_lines;
use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::TextStream;
use crate::domain::models::Upstream;
use crate::domain::models::UpstreamName;

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CompletionRequest {
    model: String,
    prompt: String,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    pub response: String,
    pub done: bool,
}

fn parse_line(line: &str) -> Result<Option<String>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let ores: CompletionResponse = serde_json::from_str(line)?;
    tracing::trace!(body = ?ores, "Completion response");
    if ores.response.is_empty() {
        return Ok(None);
    }

    return Ok(Some(ores.response));
}

pub struct Ollama {
    url: String,
}

impl Default for Ollama {
    fn default() -> Ollama {
        return Ollama {
            url: Config::get(ConfigKey::UpstreamURL),
        };
    }
}

#[async_trait]
impl Upstream for Ollama {
    fn name(&self) -> UpstreamName {
        return UpstreamName::Ollama;
    }

    #[allow(clippy::implicit_return)]
    async fn stream(&self, model: &str, prompt: &str) -> Result<TextStream> {
        let req = CompletionRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
        };

        let res = reqwest::Client::new()
            .post(format!("{url}/api/generate", url = self.url))
            .json(&req)
            .send()
            .await?;

        if !res.status().is_success() {
            tracing::error!(
                status = res.status().as_u16(),
                "Failed to make completion request to Ollama"
            );
            bail!("Failed to make completion request to Ollama");
        }

        return Ok(text_lines(res, parse_line));
    }
}
