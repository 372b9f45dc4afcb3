#[cfg(test)]
#[path = "server_test.rs"]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use anyhow::Result;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::ConnectInfo;
use axum::extract::Query;
use axum::extract::State;
use axum::http::header;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use futures::stream;
use futures::StreamExt;
use futures::TryStreamExt;
use serde_derive::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::encode_usage;
use crate::domain::models::quota_key;
use crate::domain::models::EndpointError;
use crate::domain::models::ExchangeBody;
use crate::domain::models::GenerationBody;
use crate::domain::models::GenerationRequest;
use crate::domain::models::ModelCatalog;
use crate::domain::models::SaveResponse;
use crate::domain::models::UsageSnapshot;
use crate::domain::models::Upstream;
use crate::domain::models::UpstreamName;
use crate::domain::services::Authorizer;
use crate::domain::services::AuthorizerSettings;
use crate::domain::services::ExchangeLog;
use crate::domain::services::QuotaLedger;
use crate::domain::services::QuotaLimits;
use crate::domain::services::UserDirectory;
use crate::infrastructure::upstreams::UpstreamManager;
use crate::infrastructure::verifiers::VerifierManager;

impl IntoResponse for EndpointError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(self.to_body())).into_response();
    }
}

#[derive(Clone)]
pub struct ServerState {
    authorizer: Arc<Authorizer>,
    upstream: Arc<dyn Upstream + Send + Sync>,
    site_key: String,
}

impl ServerState {
    pub fn new(
        authorizer: Authorizer,
        upstream: Arc<dyn Upstream + Send + Sync>,
        site_key: &str,
    ) -> ServerState {
        return ServerState {
            authorizer: Arc::new(authorizer),
            upstream,
            site_key: site_key.to_string(),
        };
    }

    pub fn from_config() -> Result<ServerState> {
        let catalog = ModelCatalog::parse(
            &Config::get(ConfigKey::Models),
            &Config::get(ConfigKey::DefaultModel),
        )?;
        let users = UserDirectory::from_lists(
            &Config::get(ConfigKey::PremiumUsers),
            &Config::get(ConfigKey::RegisteredUsers),
        );
        let limits = QuotaLimits {
            guest: Config::get_u64(ConfigKey::GuestDailyLimit) as u32,
            free: Config::get_u64(ConfigKey::FreeDailyLimit) as u32,
            premium: Config::get_u64(ConfigKey::PremiumDailyLimit) as u32,
        };
        let settings = AuthorizerSettings {
            legacy_checks: Config::get_bool(ConfigKey::LegacyChecks),
            flood_interval: chrono::Duration::seconds(
                Config::get_u64(ConfigKey::FloodInterval) as i64,
            ),
        };

        let upstream_name = Config::get(ConfigKey::Upstream);
        let upstream = UpstreamName::parse(&upstream_name)
            .ok_or_else(|| return anyhow!(format!("Unknown upstream '{upstream_name}'")))?;

        tracing::info!(
            models = ?catalog.ids(),
            listed_users = users.count(),
            "Loaded model catalog and user lists"
        );

        let authorizer = Authorizer::new(
            catalog,
            Arc::new(users),
            Arc::new(QuotaLedger::new(limits)),
            Arc::new(ExchangeLog::default()),
            VerifierManager::get(&Config::get(ConfigKey::TurnstileSecret)),
            settings,
        );

        return Ok(ServerState::new(
            authorizer,
            Arc::from(UpstreamManager::get(upstream)?),
            &Config::get(ConfigKey::TurnstileSiteKey),
        ));
    }
}

#[derive(Debug, Deserialize)]
struct UsageQuery {
    user_id: Option<String>,
}

async fn health(State(state): State<ServerState>) -> Json<serde_json::Value> {
    return Json(json!({
        "status": "ok",
        "models": state.authorizer.catalog.ids(),
    }));
}

async fn usage(
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<UsageQuery>,
) -> Json<UsageSnapshot> {
    return Json(
        state
            .authorizer
            .usage(query.user_id.as_deref(), &addr.ip().to_string()),
    );
}

async fn verify_page(State(state): State<ServerState>) -> Html<String> {
    if state.site_key.is_empty() {
        return Html(
            "<!doctype html><html><body><p>Verification is not configured on this server. Any non-empty token is accepted.</p></body></html>"
                .to_string(),
        );
    }

    return Html(format!(
        r#"<!doctype html>
<html>
<head>
<title>Promptgate verification</title>
<script src="https://challenges.cloudflare.com/turnstile/v0/api.js" async defer></script>
</head>
<body>
<div class="cf-turnstile" data-sitekey="{site_key}" data-callback="showToken"></div>
<p>Copy this token into your terminal:</p>
<pre id="token"></pre>
<script>function showToken(token) {{ document.getElementById("token").textContent = token; }}</script>
</body>
</html>"#,
        site_key = state.site_key
    ));
}

async fn generate(
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Result<Json<GenerationBody>, JsonRejection>,
) -> Result<Response, EndpointError> {
    let Json(body) = body.map_err(|err| return EndpointError::InvalidInput(err.body_text()))?;
    let request = GenerationRequest::from_body(body, &addr.ip().to_string());

    let authorization = match state.authorizer.authorize(&request).await {
        Ok(authorization) => authorization,
        Err(err) => {
            tracing::debug!(error = %err, status = err.status(), "Generation rejected");
            return Err(err);
        }
    };
    let quota = &state.authorizer.quota;
    let usage = encode_usage(&authorization.usage).map_err(|err| {
        quota.refund(&authorization.quota_key, authorization.day);
        return EndpointError::Internal(err.to_string());
    })?;

    let text = match state
        .upstream
        .stream(&authorization.model.id, &request.input_text)
        .await
    {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(error = ?err, upstream = %state.upstream.name(), "Upstream request failed");
            quota.refund(&authorization.quota_key, authorization.day);
            return Err(EndpointError::Upstream(
                "The model provider is unavailable, try again later.".to_string(),
            ));
        }
    };

    tracing::info!(
        model = %authorization.model.id,
        quota_key = %authorization.quota_key,
        used = authorization.usage.used,
        "Streaming generation"
    );

    let body_stream = text
        .map_ok(Bytes::from)
        .inspect_err(|err| {
            tracing::error!(error = ?err, "Upstream stream failed");
        })
        .chain(stream::once(async move {
            return Ok(Bytes::from(usage));
        }));

    let res = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(body_stream))
        .map_err(|err| return EndpointError::Internal(err.to_string()))?;

    return Ok(res);
}

async fn save_exchange(
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Result<Json<ExchangeBody>, JsonRejection>,
) -> Result<Json<SaveResponse>, EndpointError> {
    let Json(body) = body.map_err(|err| return EndpointError::InvalidInput(err.body_text()))?;
    let key = quota_key(body.user_id.as_deref(), &addr.ip().to_string());

    let res = state.authorizer.exchanges.record(&key, &body, Utc::now());
    tracing::debug!(key = %key, skipped = res.skipped, reason = ?res.reason, "Exchange recorded");

    return Ok(Json(res));
}

pub fn build_router(state: ServerState) -> Router {
    return Router::new()
        .route("/api/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/exchanges", post(save_exchange))
        .route("/api/usage", get(usage))
        .route("/verify", get(verify_page))
        .with_state(state);
}

/// Prunes per-caller state once an hour so the maps only hold recent callers.
fn spawn_pruning(authorizer: Arc<Authorizer>) -> JoinHandle<()> {
    return tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            ticker.tick().await;
            authorizer.prune(Utc::now());
        }
    });
}

/// Serves the endpoint until Ctrl-C.
pub async fn start() -> Result<()> {
    let state = ServerState::from_config()?;
    let pruning = spawn_pruning(state.authorizer.clone());
    let listen_addr = Config::get(ConfigKey::ListenAddr);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Generation endpoint listening");

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?err, "Failed to listen for shutdown signal");
        }
    })
    .await?;

    pruning.abort();
    return Ok(());
}
