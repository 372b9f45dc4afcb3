#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ClientState;
use super::GateState;
use super::PersistenceGuard;
use super::StreamDemux;
use super::VerificationGate;
use crate::domain::models::classify_rejection;
use crate::domain::models::validate_input;
use crate::domain::models::ByteStream;
use crate::domain::models::ChatExchange;
use crate::domain::models::Event;
use crate::domain::models::GenerationBody;
use crate::domain::models::GenerationError;
use crate::domain::models::Segment;
use crate::domain::models::StreamSession;
use crate::domain::models::TransportBox;
use crate::domain::models::UsageSnapshot;
use crate::domain::models::VerificationToken;

pub struct OrchestratorSettings {
    pub identity: Option<String>,
    pub allow_anonymous: bool,
    pub timeout: Duration,
    pub max_verification_attempts: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> OrchestratorSettings {
        return OrchestratorSettings {
            identity: None,
            allow_anonymous: true,
            timeout: Duration::from_secs(30),
            max_verification_attempts: 3,
        };
    }
}

/// The input and model of the most recent submission, replayed by retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastAttempt {
    pub input_text: String,
    pub model_id: String,
}

fn notify(tx: &mpsc::UnboundedSender<Event>, event: Event) {
    if tx.send(event).is_err() {
        tracing::debug!("Event receiver dropped");
    }
}

async fn next_chunk(
    body: &mut ByteStream,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Result<Option<Bytes>, GenerationError> {
    let chunk = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
        _ = tokio::time::sleep_until(deadline) => return Err(GenerationError::Timeout),
        chunk = body.next() => chunk,
    };

    return chunk.transpose();
}

/// Client-side controller for generations: validation, verification,
/// streaming, error classification and persistence of finished exchanges.
pub struct GenerationOrchestrator {
    transport: TransportBox,
    gate: VerificationGate,
    persistence: PersistenceGuard,
    client_state: ClientState,
    settings: OrchestratorSettings,
    pending_generation: bool,
    session: Option<StreamSession>,
    last_attempt: Option<LastAttempt>,
    usage: Option<UsageSnapshot>,
    last_save: Option<JoinHandle<()>>,
}

impl GenerationOrchestrator {
    pub fn new(
        transport: TransportBox,
        gate: VerificationGate,
        persistence: PersistenceGuard,
        client_state: ClientState,
        settings: OrchestratorSettings,
    ) -> GenerationOrchestrator {
        return GenerationOrchestrator {
            transport,
            gate,
            persistence,
            client_state,
            settings,
            pending_generation: false,
            session: None,
            last_attempt: None,
            usage: None,
            last_save: None,
        };
    }

    pub fn usage(&self) -> Option<&UsageSnapshot> {
        return self.usage.as_ref();
    }

    #[cfg(test)]
    pub fn last_attempt(&self) -> Option<&LastAttempt> {
        return self.last_attempt.as_ref();
    }

    #[cfg(test)]
    pub fn is_pending_generation(&self) -> bool {
        return self.pending_generation;
    }

    #[cfg(test)]
    pub fn has_active_session(&self) -> bool {
        return self.session.is_some();
    }

    #[cfg(test)]
    pub fn gate_state(&self) -> GateState {
        return self.gate.state();
    }

    pub fn is_saving(&self) -> bool {
        return self.persistence.is_saving();
    }

    /// Runs one generation to completion, streaming text and usage updates to
    /// `tx` as they arrive. Returns the finished exchange, or `None` when the
    /// backend produced no text.
    pub async fn submit(
        &mut self,
        input_text: &str,
        model_id: &str,
        cancel: CancellationToken,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> Result<Option<ChatExchange>, GenerationError> {
        let res = self.run(input_text, model_id, cancel, tx).await;

        match &res {
            Ok(exchange) => {
                notify(tx, Event::GenerationCompleted(exchange.clone()));
            }
            Err(err) => {
                if err.is_system_fault() {
                    tracing::error!(error = %err, model = model_id, "Generation failed");
                } else if err.rearms_verification() {
                    tracing::info!(error = %err, "Generation rejected by verification");
                } else {
                    tracing::debug!(error = %err, "Generation not allowed");
                }
                notify(tx, Event::GenerationFailed(err.clone()));
            }
        }

        return res;
    }

    /// Replays the last submitted input and model, regardless of what the
    /// user has typed since.
    pub async fn retry(
        &mut self,
        cancel: CancellationToken,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> Result<Option<ChatExchange>, GenerationError> {
        let Some(attempt) = self.last_attempt.clone() else {
            let err = GenerationError::Validation("There is nothing to retry yet.".to_string());
            notify(tx, Event::GenerationFailed(err.clone()));
            return Err(err);
        };

        return self
            .submit(&attempt.input_text, &attempt.model_id, cancel, tx)
            .await;
    }

    /// Waits for the most recent background save, if any.
    pub async fn wait_for_saves(&mut self) {
        if let Some(handle) = self.last_save.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = ?err, "Save task failed");
            }
        }
    }

    async fn run(
        &mut self,
        input_text: &str,
        model_id: &str,
        cancel: CancellationToken,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> Result<Option<ChatExchange>, GenerationError> {
        if let Some(reason) = validate_input(input_text) {
            return Err(GenerationError::Validation(reason));
        }

        if self.settings.identity.is_none() && !self.settings.allow_anonymous {
            if let Err(err) = self.client_state.save_draft(input_text).await {
                tracing::warn!(error = ?err, "Failed to save draft prompt");
            }
            return Err(GenerationError::AuthRequired);
        }

        self.last_attempt = Some(LastAttempt {
            input_text: input_text.to_string(),
            model_id: model_id.to_string(),
        });

        let token = self.ensure_token(&cancel, tx).await?;
        let body = GenerationBody {
            text_str: input_text.to_string(),
            user_id: self.settings.identity.clone(),
            turnstile_token: token.value,
            model_id: model_id.to_string(),
        };

        self.session = Some(StreamSession::new(cancel));
        notify(tx, Event::GenerationStarted(model_id.to_string()));

        let res = self.stream(&body, tx).await;
        // The token went out with the request, it is spent either way.
        self.gate.reset();
        let session = self.session.take();
        res?;

        let Some(mut session) = session else {
            return Ok(None);
        };
        session.completed = true;
        if session.text.is_empty() {
            tracing::debug!(model = model_id, "Generation completed without text");
            return Ok(None);
        }

        let exchange = ChatExchange::new(input_text, &session.text, self.settings.identity.clone());
        if let Some(handle) = self.persistence.save(exchange.clone()) {
            self.last_save = Some(handle);
        }

        return Ok(Some(exchange));
    }

    async fn ensure_token(
        &mut self,
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> Result<VerificationToken, GenerationError> {
        if let Some(token) = self.gate.take_token() {
            return Ok(token);
        }

        self.pending_generation = true;
        notify(tx, Event::VerificationRequested());

        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                state = self.gate.acquire() => Some(state),
            };
            let Some(state) = outcome else {
                self.pending_generation = false;
                self.gate.reset();
                return Err(GenerationError::Cancelled);
            };

            let err = match state {
                GateState::Verified => {
                    self.pending_generation = false;
                    break;
                }
                GateState::Expired => GenerationError::VerificationExpired,
                GateState::Failed(reason) => GenerationError::VerificationFailed(reason),
                GateState::Idle | GateState::Pending => {
                    GenerationError::VerificationFailed("challenge did not finish".to_string())
                }
            };

            if attempts >= self.settings.max_verification_attempts {
                self.pending_generation = false;
                self.gate.reset();
                return Err(err);
            }
            tracing::info!(attempts, error = %err, "Re-arming verification for pending generation");
        }

        return self
            .gate
            .take_token()
            .ok_or(GenerationError::VerificationExpired);
    }

    async fn stream(
        &mut self,
        body: &GenerationBody,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> Result<(), GenerationError> {
        let cancel = match &self.session {
            Some(session) => session.cancel.clone(),
            None => CancellationToken::new(),
        };
        let deadline = Instant::now() + self.settings.timeout;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(GenerationError::Timeout),
            res = self.transport.send(body) => res?,
        };

        let status = response.status;
        let success = response.is_success();
        let mut body_stream = response.body;

        if !success {
            let mut payload = vec![];
            while let Some(chunk) = next_chunk(&mut body_stream, &cancel, deadline).await? {
                payload.extend_from_slice(&chunk);
            }
            return Err(classify_rejection(
                status,
                &String::from_utf8_lossy(&payload),
            ));
        }

        let mut demux = StreamDemux::new();
        while let Some(chunk) = next_chunk(&mut body_stream, &cancel, deadline).await? {
            let segments = demux.push(&chunk);
            self.apply(segments, tx);
        }
        let segments = demux.finish();
        self.apply(segments, tx);

        return Ok(());
    }

    fn apply(&mut self, segments: Vec<Segment>, tx: &mpsc::UnboundedSender<Event>) {
        for segment in segments {
            match segment {
                Segment::Text(text) => {
                    if let Some(session) = self.session.as_mut() {
                        session.text += &text;
                    }
                    notify(tx, Event::GenerationText(text));
                }
                Segment::Usage(snapshot) => {
                    if let Some(session) = self.session.as_mut() {
                        session.usage = Some(snapshot.clone());
                    }
                    self.usage = Some(snapshot.clone());
                    notify(tx, Event::UsageUpdated(snapshot));
                }
            }
        }
    }
}
