use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::build_router;
use super::ServerState;
use crate::domain::models::ChallengeOutcome;
use crate::domain::models::ErrorBody;
use crate::domain::models::Event;
use crate::domain::models::GenerationError;
use crate::domain::models::ModelCatalog;
use crate::domain::models::SaveResponse;
use crate::domain::models::TextStream;
use crate::domain::models::TokenVerifier;
use crate::domain::models::Upstream;
use crate::domain::models::UpstreamName;
use crate::domain::models::UsageSnapshot;
use crate::domain::models::UserType;
use crate::domain::models::VerificationWidget;
use crate::domain::models::WidgetName;
use crate::domain::models::USAGE_END_MARKER;
use crate::domain::models::USAGE_START_MARKER;
use crate::domain::services::Authorizer;
use crate::domain::services::AuthorizerSettings;
use crate::domain::services::ClientState;
use crate::domain::services::ExchangeLog;
use crate::domain::services::GenerationOrchestrator;
use crate::domain::services::OrchestratorSettings;
use crate::domain::services::PersistenceGuard;
use crate::domain::services::QuotaLedger;
use crate::domain::services::QuotaLimits;
use crate::domain::services::UserDirectory;
use crate::domain::services::VerificationGate;
use crate::infrastructure::transport::HttpExchangeStore;
use crate::infrastructure::transport::HttpGenerationTransport;

struct FakeUpstream {
    fail: bool,
}

#[async_trait]
impl Upstream for FakeUpstream {
    fn name(&self) -> UpstreamName {
        return UpstreamName::Ollama;
    }

    #[allow(clippy::implicit_return)]
    async fn stream(&self, _model: &str, _prompt: &str) -> Result<TextStream> {
        if self.fail {
            bail!("provider down");
        }

        let chunks = vec!["Hello ".to_string(), "world".to_string()];
        return Ok(stream::iter(chunks.into_iter().map(Ok)).boxed());
    }
}

struct GoodTokenVerifier {}

#[async_trait]
impl TokenVerifier for GoodTokenVerifier {
    #[allow(clippy::implicit_return)]
    async fn verify(&self, token: &str, _remote_addr: &str) -> Result<bool> {
        return Ok(token == "good");
    }
}

struct GoodTokenWidget {}

#[async_trait]
impl VerificationWidget for GoodTokenWidget {
    fn name(&self) -> WidgetName {
        return WidgetName::Static;
    }

    #[allow(clippy::implicit_return)]
    async fn challenge(&self) -> ChallengeOutcome {
        return ChallengeOutcome::Verified("good".to_string());
    }
}

struct TestServer {
    url: String,
    quota: Arc<QuotaLedger>,
}

async fn spawn_server(fail_upstream: bool, legacy_checks: bool) -> Result<TestServer> {
    let quota = Arc::new(QuotaLedger::new(QuotaLimits {
        guest: 2,
        free: 10,
        premium: 100,
    }));
    let authorizer = Authorizer::new(
        ModelCatalog::parse("gpt-4o-mini:free,gpt-4o:premium", "gpt-4o-mini")?,
        Arc::new(UserDirectory::from_lists("paula", "fred")),
        quota.clone(),
        Arc::new(ExchangeLog::default()),
        Box::new(GoodTokenVerifier {}),
        AuthorizerSettings {
            legacy_checks,
            ..AuthorizerSettings::default()
        },
    );
    let state = ServerState::new(
        authorizer,
        Arc::new(FakeUpstream {
            fail: fail_upstream,
        }),
        "",
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let res = axum::serve(
            listener,
            build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
        if let Err(err) = res {
            tracing::error!(error = ?err, "Test server stopped");
        }
    });

    return Ok(TestServer {
        url: format!("http://{addr}"),
        quota,
    });
}

fn generation_json(model_id: &str, user_id: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "textStr": "Tell me a story about crabs",
        "turnstileToken": "good",
        "modelId": model_id,
    });
    if let Some(user_id) = user_id {
        body["user_id"] = serde_json::Value::String(user_id.to_string());
    }

    return body;
}

async fn post_generate(
    server: &TestServer,
    body: &serde_json::Value,
) -> Result<reqwest::Response> {
    return Ok(reqwest::Client::new()
        .post(format!("{}/api/generate", server.url))
        .json(body)
        .send()
        .await?);
}

#[tokio::test]
async fn it_reports_health() -> Result<()> {
    let server = spawn_server(false, true).await?;
    let res = reqwest::get(format!("{}/api/health", server.url)).await?;

    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["models"], serde_json::json!(["gpt-4o-mini", "gpt-4o"]));

    return Ok(());
}

#[tokio::test]
async fn it_streams_text_then_usage() -> Result<()> {
    let server = spawn_server(false, true).await?;
    let res = post_generate(&server, &generation_json("gpt-4o-mini", None)).await?;

    assert_eq!(res.status(), 200);
    let expected = format!(
        r#"Hello world{USAGE_START_MARKER}{{"used":1,"limit":2,"remaining":1,"userType":"guest","canUse":true}}{USAGE_END_MARKER}"#
    );
    assert_eq!(res.text().await?, expected);

    return Ok(());
}

#[tokio::test]
async fn it_rejects_premium_models_for_guests() -> Result<()> {
    let server = spawn_server(false, true).await?;
    let res = post_generate(&server, &generation_json("gpt-4o", None)).await?;

    assert_eq!(res.status(), 403);
    let body = res.json::<ErrorBody>().await?;
    assert_eq!(body.requires_upgrade, Some(true));
    assert_eq!(body.model_id.as_deref(), Some("gpt-4o"));

    return Ok(());
}

#[tokio::test]
async fn it_rejects_bad_tokens() -> Result<()> {
    let server = spawn_server(false, true).await?;
    let mut body = generation_json("gpt-4o-mini", None);
    body["turnstileToken"] = serde_json::Value::String("bad".to_string());
    let res = post_generate(&server, &body).await?;

    assert_eq!(res.status(), 403);
    let body = res.json::<ErrorBody>().await?;
    assert_eq!(body.requires_upgrade, None);

    return Ok(());
}

#[tokio::test]
async fn it_rejects_malformed_bodies() -> Result<()> {
    let server = spawn_server(false, true).await?;
    let res = reqwest::Client::new()
        .post(format!("{}/api/generate", server.url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;

    assert_eq!(res.status(), 400);
    assert!(!res.json::<ErrorBody>().await?.error.is_empty());

    return Ok(());
}

#[tokio::test]
async fn it_reports_usage_when_the_quota_runs_out() -> Result<()> {
    let server = spawn_server(false, false).await?;
    for _ in 0..2 {
        let res = post_generate(&server, &generation_json("gpt-4o-mini", None)).await?;
        assert_eq!(res.status(), 200);
        res.text().await?;
    }

    let res = post_generate(&server, &generation_json("gpt-4o-mini", None)).await?;
    assert_eq!(res.status(), 429);
    let body = res.json::<ErrorBody>().await?;
    assert_eq!(
        body.usage_info,
        Some(UsageSnapshot::new(2, 2, UserType::Guest))
    );

    return Ok(());
}

#[tokio::test]
async fn it_reports_usage_for_the_caller() -> Result<()> {
    let server = spawn_server(false, true).await?;
    let res = post_generate(&server, &generation_json("gpt-4o", Some("paula"))).await?;
    assert_eq!(res.status(), 200);
    res.text().await?;

    let premium = reqwest::get(format!("{}/api/usage?user_id=paula", server.url))
        .await?
        .json::<UsageSnapshot>()
        .await?;
    assert_eq!(premium, UsageSnapshot::new(1, 100, UserType::Premium));

    let guest = reqwest::get(format!("{}/api/usage", server.url))
        .await?
        .json::<UsageSnapshot>()
        .await?;
    assert_eq!(guest, UsageSnapshot::new(0, 2, UserType::Guest));

    return Ok(());
}

#[tokio::test]
async fn it_refunds_quota_when_the_upstream_fails() -> Result<()> {
    let server = spawn_server(true, true).await?;
    let res = post_generate(&server, &generation_json("gpt-4o-mini", Some("fred"))).await?;

    assert_eq!(res.status(), 503);
    assert_eq!(
        server
            .quota
            .snapshot("user:fred", UserType::Free, Utc::now().date_naive())
            .used,
        0
    );

    return Ok(());
}

#[tokio::test]
async fn it_applies_flood_control_after_a_saved_exchange() -> Result<()> {
    let server = spawn_server(false, true).await?;
    let saved = reqwest::Client::new()
        .post(format!("{}/api/exchanges", server.url))
        .json(&serde_json::json!({
            "input_text": "Tell me a story about crabs",
            "output_text": "Once upon a time",
            "user_id": "fred",
        }))
        .send()
        .await?
        .json::<SaveResponse>()
        .await?;
    assert!(!saved.skipped);

    let res = post_generate(&server, &generation_json("gpt-4o-mini", Some("fred"))).await?;
    assert_eq!(res.status(), 429);
    assert_eq!(res.json::<ErrorBody>().await?.usage_info, None);

    return Ok(());
}

#[tokio::test]
async fn it_serves_a_full_client_round_trip() -> Result<()> {
    let server = spawn_server(false, true).await?;
    let state_dir = std::env::temp_dir().join(format!("promptgate-test-{}", Uuid::new_v4()));

    let mut orchestrator = GenerationOrchestrator::new(
        Box::new(HttpGenerationTransport::new(&server.url)),
        VerificationGate::new(Box::new(GoodTokenWidget {}), Duration::from_secs(300)),
        PersistenceGuard::new(Arc::new(HttpExchangeStore::new(&server.url))),
        ClientState::new(state_dir),
        OrchestratorSettings {
            identity: Some("paula".to_string()),
            ..OrchestratorSettings::default()
        },
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let exchange = orchestrator
        .submit(
            "Tell me a story about crabs",
            "gpt-4o",
            CancellationToken::new(),
            &tx,
        )
        .await?
        .unwrap();
    orchestrator.wait_for_saves().await;

    assert_eq!(exchange.output_text, "Hello world");
    assert_eq!(
        orchestrator.usage(),
        Some(&UsageSnapshot::new(1, 100, UserType::Premium))
    );
    assert!(rx.try_recv().is_ok());

    // The saved exchange now holds back an immediate follow-up.
    let err = orchestrator
        .submit(
            "Tell me another story",
            "gpt-4o",
            CancellationToken::new(),
            &tx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::FloodControl(_)));

    return Ok(());
}
