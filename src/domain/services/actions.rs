#[cfg(test)]
#[path = "actions_test.rs"]
mod tests;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ClientState;
use super::GenerationOrchestrator;
use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::Action;
use crate::domain::models::Event;
use crate::domain::models::SlashCommand;

pub fn help_text() -> String {
    let text = r#"
COMMANDS:
- /model (/m) [MODEL_ID] - Sets the model used for the next prompts. Without an id, shows the current model.
- /retry (/r) - Sends your last prompt again with the model it was sent with.
- /usage (/u) - Shows how many requests you have left today.
- /quit /exit (/q) - Exit Promptgate.
- /help (/h) - Provides this help menu.

HOTKEYS:
- CTRL+C - Cancel the generation in progress, otherwise exit.

Prompts must be between 10 and 1000 characters. Each prompt needs a passed
verification challenge, which is requested when needed.
        "#;

    return text.trim().to_string();
}

fn notice(tx: &mpsc::UnboundedSender<Event>, text: &str) -> Result<()> {
    tx.send(Event::Notice(text.to_string()))?;
    return Ok(());
}

/// Feeds user actions into the orchestrator, one generation at a time.
pub struct ActionsService {
    orchestrator: GenerationOrchestrator,
    client_state: ClientState,
    model_id: String,
}

impl ActionsService {
    pub fn new(
        orchestrator: GenerationOrchestrator,
        client_state: ClientState,
        model_id: &str,
    ) -> ActionsService {
        return ActionsService {
            orchestrator,
            client_state,
            model_id: model_id.to_string(),
        };
    }

    pub fn model_id(&self) -> &str {
        return &self.model_id;
    }

    /// Runs until the action channel closes, then waits for pending saves.
    /// Every handled action is followed by `Event::Ready`.
    pub async fn start(
        &mut self,
        tx: mpsc::UnboundedSender<Event>,
        rx: &mut mpsc::UnboundedReceiver<Action>,
    ) -> Result<()> {
        while let Some(action) = rx.recv().await {
            let keep_running = self.handle(action, &tx, rx).await?;
            tx.send(Event::Ready())?;
            if !keep_running {
                break;
            }
        }

        if self.orchestrator.is_saving() {
            tracing::debug!("Waiting for the last exchange to be saved");
        }
        self.orchestrator.wait_for_saves().await;
        return Ok(());
    }

    async fn handle(
        &mut self,
        action: Action,
        tx: &mpsc::UnboundedSender<Event>,
        rx: &mut mpsc::UnboundedReceiver<Action>,
    ) -> Result<bool> {
        let text = match action {
            Action::Cancel() => {
                notice(tx, "Nothing to cancel.")?;
                return Ok(true);
            }
            Action::SetModel(model_id) => {
                self.set_model(&model_id, tx).await?;
                return Ok(true);
            }
            Action::Retry() => {
                self.generate(None, tx, rx).await?;
                return Ok(true);
            }
            Action::Submit(text) => text,
        };

        if let Some(command) = SlashCommand::parse(&text) {
            if command.is_model_set() {
                match command.args.first() {
                    Some(model_id) => self.set_model(model_id, tx).await?,
                    None => notice(tx, &format!("Current model: {}", self.model_id))?,
                }
            } else if command.is_retry() {
                self.generate(None, tx, rx).await?;
            } else if command.is_usage() {
                self.usage(tx)?;
            } else if command.is_help() {
                notice(tx, &help_text())?;
            } else if command.is_quit() {
                return Ok(false);
            }

            return Ok(true);
        }

        self.generate(Some(text), tx, rx).await?;
        return Ok(true);
    }

    async fn set_model(
        &mut self,
        model_id: &str,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> Result<()> {
        self.model_id = model_id.to_string();
        Config::set(ConfigKey::Model, model_id);
        if let Err(err) = self.client_state.set_last_model(model_id).await {
            tracing::warn!(error = ?err, "Failed to remember selected model");
        }

        notice(tx, &format!("{model_id} will answer your next prompt."))?;
        return Ok(());
    }

    fn usage(&self, tx: &mpsc::UnboundedSender<Event>) -> Result<()> {
        match self.orchestrator.usage() {
            Some(usage) => notice(tx, &usage.describe())?,
            None => notice(tx, "No usage reported yet. Send a prompt first.")?,
        }

        return Ok(());
    }

    /// Runs a submission, or a retry when `text` is `None`, while still
    /// listening for cancellation.
    async fn generate(
        &mut self,
        text: Option<String>,
        tx: &mpsc::UnboundedSender<Event>,
        rx: &mut mpsc::UnboundedReceiver<Action>,
    ) -> Result<()> {
        let cancel = CancellationToken::new();
        let model_id = self.model_id.to_string();
        let orchestrator = &mut self.orchestrator;
        let generation = async {
            match &text {
                Some(text) => {
                    return orchestrator
                        .submit(text, &model_id, cancel.clone(), tx)
                        .await;
                }
                None => return orchestrator.retry(cancel.clone(), tx).await,
            }
        };
        tokio::pin!(generation);

        let mut listening = true;
        loop {
            tokio::select! {
                _ = &mut generation => break,
                action = rx.recv(), if listening => match action {
                    Some(Action::Cancel()) => cancel.cancel(),
                    Some(_) => notice(tx, "A generation is already in progress.")?,
                    None => {
                        listening = false;
                        cancel.cancel();
                    }
                },
            }
        }

        return Ok(());
    }
}
