#[cfg(test)]
#[path = "client_state_test.rs"]
mod tests;

use std::path;

use anyhow::Result;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::configuration::Config;
use crate::configuration::ConfigKey;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,
}

/// Small client-side store for the prompt draft kept across a sign-in and
/// the last selected model.
pub struct ClientState {
    pub state_dir: path::PathBuf,
}

impl Default for ClientState {
    fn default() -> ClientState {
        let configured = Config::get(ConfigKey::StateDir);
        if !configured.is_empty() {
            return ClientState::new(path::PathBuf::from(configured));
        }

        let state_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("promptgate");
        return ClientState::new(state_dir);
    }
}

impl ClientState {
    pub fn new(state_dir: path::PathBuf) -> ClientState {
        return ClientState { state_dir };
    }

    fn file_path(&self) -> path::PathBuf {
        return self.state_dir.join("state.yaml");
    }

    pub async fn load(&self) -> Result<LocalState> {
        let file_path = self.file_path();
        if !file_path.exists() {
            return Ok(LocalState::default());
        }

        let payload = fs::read_to_string(file_path).await?;
        let state: LocalState = serde_yaml::from_str(&payload)?;
        return Ok(state);
    }

    async fn store(&self, state: &LocalState) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
        }

        let payload = serde_yaml::to_string(state)?;
        let mut file = fs::File::create(self.file_path()).await?;
        file.write_all(payload.as_bytes()).await?;

        return Ok(());
    }

    pub async fn save_draft(&self, text: &str) -> Result<()> {
        let mut state = self.load().await?;
        state.draft_prompt = Some(text.to_string());
        return self.store(&state).await;
    }

    /// Returns the saved draft, clearing it.
    pub async fn take_draft(&self) -> Result<Option<String>> {
        let mut state = self.load().await?;
        let draft = state.draft_prompt.take();
        if draft.is_some() {
            self.store(&state).await?;
        }

        return Ok(draft);
    }

    pub async fn set_last_model(&self, model_id: &str) -> Result<()> {
        let mut state = self.load().await?;
        state.last_model = Some(model_id.to_string());
        return self.store(&state).await;
    }

    pub async fn last_model(&self) -> Result<Option<String>> {
        return Ok(self.load().await?.last_model);
    }
}
