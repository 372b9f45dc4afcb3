use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use super::ChatExchange;
use super::GenerationBody;
use super::GenerationError;
use super::SaveResponse;

pub type ByteStream = BoxStream<'static, Result<Bytes, GenerationError>>;

/// Response head plus an incrementally readable body.
pub struct GenerationResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl GenerationResponse {
    pub fn is_success(&self) -> bool {
        return (200..300).contains(&self.status);
    }
}

#[async_trait]
pub trait GenerationTransport {
    /// Posts a generation request. Resolves once response headers arrive, the
    /// body is left for the caller to stream.
    async fn send(&self, body: &GenerationBody) -> Result<GenerationResponse, GenerationError>;
}

pub type TransportBox = Box<dyn GenerationTransport + Send + Sync>;

#[async_trait]
pub trait ExchangeStore {
    /// Hands a finished exchange to the save exchange collaborator.
    async fn save(&self, exchange: &ChatExchange) -> Result<SaveResponse>;
}
