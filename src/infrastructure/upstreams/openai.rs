#[cfg(test)]
#[path = "openai_test.rs"]
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
struct MessageRequest {
    role: String,
    content: String,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<MessageRequest>,
    stream: bool,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CompletionDeltaResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CompletionChoiceResponse {
    delta: CompletionDeltaResponse,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoiceResponse>,
}

/// Reads one server-sent event line of a streamed chat completion.
fn parse_line(line: &str) -> Result<Option<String>> {
    let mut cleaned_line = line.trim();
    if let Some(data) = cleaned_line.strip_prefix("data:") {
        cleaned_line = data.trim();
    }
    if cleaned_line.is_empty() || cleaned_line == "[DONE]" {
        return Ok(None);
    }

    let ores: CompletionResponse = serde_json::from_str(cleaned_line)?;
    tracing::trace!(body = ?ores, "Completion response");

    let text = ores
        .choices
        .into_iter()
        .next()
        .and_then(|choice| return choice.delta.content)
        .filter(|text| return !text.is_empty());

    return Ok(text);
}

pub struct OpenAI {
    url: String,
    token: String,
}

impl Default for OpenAI {
    fn default() -> OpenAI {
        return OpenAI {
            url: Config::get(ConfigKey::UpstreamURL),
            token: Config::get(ConfigKey::UpstreamToken),
        };
    }
}

#[async_trait]
impl Upstream for OpenAI {
    fn name(&self) -> UpstreamName {
        return UpstreamName::OpenAI;
    }

    #[allow(clippy::implicit_return)]
    async fn stream(&self, model: &str, prompt: &str) -> Result<TextStream> {
        if self.url.is_empty() {
            bail!("OpenAI URL is not defined");
        }

        let req = CompletionRequest {
            model: model.to_string(),
            messages: vec![MessageRequest {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: true,
        };

        let res = reqwest::Client::new()
            .post(format!("{url}/v1/chat/completions", url = self.url))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&req)
            .send()
            .await?;

        if !res.status().is_success() {
            tracing::error!(
                status = res.status().as_u16(),
                "Failed to make completion request to OpenAI"
            );
            bail!("Failed to make completion request to OpenAI");
        }

        return Ok(text_lines(res, parse_line));
    }
}
