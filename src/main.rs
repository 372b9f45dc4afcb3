#![deny(clippy::implicit_return)]
#![allow(clippy::needless_return)]

mod application;
mod configuration;
mod domain;
mod infrastructure;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use anyhow::Error;
use anyhow::Result;
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tokio::task;

use crate::application::cli;
use crate::application::cli::Mode;
use crate::application::server;
use crate::application::ui;
use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::Action;
use crate::domain::models::Event;
use crate::domain::models::WidgetName;
use crate::domain::services::actions::ActionsService;
use crate::domain::services::ClientState;
use crate::domain::services::GenerationOrchestrator;
use crate::domain::services::OrchestratorSettings;
use crate::domain::services::PersistenceGuard;
use crate::domain::services::VerificationGate;
use crate::infrastructure::transport::HttpExchangeStore;
use crate::infrastructure::transport::HttpGenerationTransport;
use crate::infrastructure::widgets::WidgetManager;

fn handle_error(err: Error) {
    eprintln!(
        "{}",
        format!(
            "Promptgate failed with the following app version and error.\n\nVersion: {}\nBuilt: {}\nError: {}",
            env!("CARGO_PKG_VERSION"),
            env!("VERGEN_BUILD_DATE"),
            err
        )
        .red()
    );

    let backtrace = err.backtrace();
    if backtrace.to_string() == "disabled backtrace" {
        let args = env::args().collect::<Vec<String>>().join(" ");
        eprintln!("\nRunning the following can help explain further what the issue is:");
        eprintln!("\nRUST_BACKTRACE=1 {args}");
    } else {
        eprintln!("\n{}", backtrace);
    }

    process::exit(1);
}

/// Wires the client side from configuration. Returns the actions service
/// and any prompt draft saved by a previous run.
async fn build_actions_service() -> Result<(ActionsService, Option<String>)> {
    let client_state = ClientState::default();
    let draft = match client_state.take_draft().await {
        Ok(draft) => draft,
        Err(err) => {
            tracing::warn!(error = ?err, "Failed to read saved draft");
            None
        }
    };

    let mut model_id = Config::get(ConfigKey::Model);
    if model_id.is_empty() {
        model_id = client_state
            .last_model()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| return Config::default(ConfigKey::DefaultModel));
    }

    let widget_name = Config::get(ConfigKey::Verification);
    let widget = WidgetManager::get(
        WidgetName::parse(&widget_name)
            .ok_or_else(|| return anyhow!(format!("Unknown verification '{widget_name}'")))?,
    )?;
    let gate = VerificationGate::new(
        widget,
        Duration::from_millis(Config::get_u64(ConfigKey::VerificationTTL)),
    );

    let identity = Some(Config::get(ConfigKey::Identity)).filter(|e| return !e.is_empty());
    let settings = OrchestratorSettings {
        identity,
        allow_anonymous: Config::get_bool(ConfigKey::AllowAnonymous),
        timeout: Duration::from_millis(Config::get_u64(ConfigKey::RequestTimeout)),
        max_verification_attempts: Config::get_u64(ConfigKey::MaxVerificationAttempts) as u32,
    };

    let orchestrator = GenerationOrchestrator::new(
        Box::<HttpGenerationTransport>::default(),
        gate,
        PersistenceGuard::new(Arc::new(HttpExchangeStore::default())),
        ClientState::default(),
        settings,
    );

    return Ok((
        ActionsService::new(orchestrator, client_state, &model_id),
        draft,
    ));
}

/// Runs the chat or a single prompt. Returns false when a single prompt
/// failed.
async fn run_client(prompt: Option<String>) -> Result<bool> {
    let (mut actions, draft) = build_actions_service().await?;
    let (action_tx, mut action_rx) = mpsc::unbounded_channel::<Action>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

    let mut background_futures = task::JoinSet::new();
    background_futures.spawn(async move {
        return actions.start(event_tx, &mut action_rx).await;
    });

    let ui_res = match prompt {
        Some(prompt) => ui::ask(&prompt, action_tx, event_rx).await,
        None => ui::start(action_tx, event_rx, draft).await,
    };

    // The UI dropped its sender, so the actions loop drains and waits for
    // pending saves before finishing.
    if let Some(res) = background_futures.join_next().await {
        res??;
    }

    return ui_res;
}

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        better_panic::Settings::auto().create_panic_handler()(panic_info);
    }));

    let debug_log_dir = env::var("PROMPTGATE_LOG_DIR").unwrap_or_else(|_| {
        return dirs::cache_dir()
            .unwrap_or_else(env::temp_dir)
            .join("promptgate")
            .to_string_lossy()
            .to_string();
    });

    let file_appender = tracing_appender::rolling::never(debug_log_dir, "debug.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    if env::var("RUST_LOG")
        .unwrap_or_else(|_| return "".to_string())
        .contains("promptgate")
    {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(writer)
            .init();
    }

    let mode = match cli::parse().await {
        Ok(Some(mode)) => mode,
        Ok(None) => process::exit(0),
        Err(err) => {
            handle_error(err);
            return;
        }
    };

    let res = match mode {
        Mode::Chat => run_client(None).await,
        Mode::Ask(prompt) => run_client(Some(prompt)).await,
        Mode::Serve => {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| return tracing_subscriber::EnvFilter::new("promptgate=info"));
            // Already set when file logging is on.
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();

            server::start().await.map(|_| return true)
        }
    };

    match res {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(err) => handle_error(err),
    }
}
