use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use strum::EnumIter;
use strum::EnumVariantNames;
use strum::IntoEnumIterator;

pub type TextStream = BoxStream<'static, Result<String>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, EnumVariantNames, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum UpstreamName {
    Ollama,
    OpenAI,
}

impl UpstreamName {
    pub fn parse(text: &str) -> Option<UpstreamName> {
        return UpstreamName::iter().find(|e| return e.to_string() == text);
    }
}

/// The language-model provider the endpoint proxies to.
#[async_trait]
pub trait Upstream {
    fn name(&self) -> UpstreamName;

    /// Starts a completion for `prompt` and yields generated text as the
    /// provider produces it.
    async fn stream(&self, model: &str, prompt: &str) -> Result<TextStream>;
}

pub type UpstreamBox = Box<dyn Upstream + Send + Sync>;
