use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use test_utils::chunked;
use test_utils::streamed_body_fixture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::GenerationOrchestrator;
use super::LastAttempt;
use super::OrchestratorSettings;
use crate::domain::models::ByteStream;
use crate::domain::models::ChallengeOutcome;
use crate::domain::models::ChatExchange;
use crate::domain::models::Event;
use crate::domain::models::ExchangeStore;
use crate::domain::models::GenerationBody;
use crate::domain::models::GenerationError;
use crate::domain::models::GenerationResponse;
use crate::domain::models::GenerationTransport;
use crate::domain::models::SaveResponse;
use crate::domain::models::UsageSnapshot;
use crate::domain::models::UserType;
use crate::domain::models::VerificationWidget;
use crate::domain::models::WidgetName;
use crate::domain::services::ClientState;
use crate::domain::services::GateState;
use crate::domain::services::PersistenceGuard;
use crate::domain::services::VerificationGate;

enum Reply {
    Body(u16, Vec<String>),
    Hang,
    FirstThenHang(String),
}

struct FakeTransport {
    replies: Arc<Mutex<Vec<Reply>>>,
    requests: Arc<Mutex<Vec<GenerationBody>>>,
}

#[async_trait]
impl GenerationTransport for FakeTransport {
    #[allow(clippy::implicit_return)]
    async fn send(&self, body: &GenerationBody) -> Result<GenerationResponse, GenerationError> {
        self.requests.lock().unwrap().push(body.clone());
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Reply::Body(200, vec!["A fine answer.".to_string()])
            } else {
                replies.remove(0)
            }
        };

        let (status, body): (u16, ByteStream) = match reply {
            Reply::Body(status, chunks) => (
                status,
                stream::iter(
                    chunks
                        .into_iter()
                        .map(|chunk| return Ok(Bytes::from(chunk))),
                )
                .boxed(),
            ),
            Reply::Hang => (200, stream::pending().boxed()),
            Reply::FirstThenHang(first) => (
                200,
                stream::once(async move { return Ok(Bytes::from(first)) })
                    .chain(stream::pending())
                    .boxed(),
            ),
        };

        return Ok(GenerationResponse { status, body });
    }
}

struct TestWidget {
    outcomes: Arc<Mutex<Vec<ChallengeOutcome>>>,
    challenges: Arc<AtomicUsize>,
}

#[async_trait]
impl VerificationWidget for TestWidget {
    fn name(&self) -> WidgetName {
        return WidgetName::Static;
    }

    #[allow(clippy::implicit_return)]
    async fn challenge(&self) -> ChallengeOutcome {
        let count = self.challenges.fetch_add(1, Ordering::SeqCst) + 1;
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            return ChallengeOutcome::Verified(format!("token-{count}"));
        }
        return outcomes.remove(0);
    }
}

struct CountingStore {
    saves: Arc<AtomicUsize>,
}

#[async_trait]
impl ExchangeStore for CountingStore {
    #[allow(clippy::implicit_return)]
    async fn save(&self, _exchange: &ChatExchange) -> Result<SaveResponse> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        return Ok(SaveResponse::default());
    }
}

struct Harness {
    orchestrator: GenerationOrchestrator,
    requests: Arc<Mutex<Vec<GenerationBody>>>,
    challenges: Arc<AtomicUsize>,
    saves: Arc<AtomicUsize>,
    client_state: ClientState,
}

fn harness(
    replies: Vec<Reply>,
    outcomes: Vec<ChallengeOutcome>,
    settings: OrchestratorSettings,
) -> Harness {
    let requests = Arc::new(Mutex::new(vec![]));
    let challenges = Arc::new(AtomicUsize::new(0));
    let saves = Arc::new(AtomicUsize::new(0));
    let state_dir = std::env::temp_dir().join(format!("promptgate-test-{}", Uuid::new_v4()));

    let transport = FakeTransport {
        replies: Arc::new(Mutex::new(replies)),
        requests: requests.clone(),
    };
    let widget = TestWidget {
        outcomes: Arc::new(Mutex::new(outcomes)),
        challenges: challenges.clone(),
    };
    let store = CountingStore {
        saves: saves.clone(),
    };

    let orchestrator = GenerationOrchestrator::new(
        Box::new(transport),
        VerificationGate::new(Box::new(widget), Duration::from_secs(300)),
        PersistenceGuard::new(Arc::new(store)),
        ClientState::new(state_dir.clone()),
        settings,
    );

    return Harness {
        orchestrator,
        requests,
        challenges,
        saves,
        client_state: ClientState::new(state_dir),
    };
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    return events;
}

fn streamed_text(events: &[Event]) -> String {
    return events
        .iter()
        .filter_map(|event| {
            if let Event::GenerationText(text) = event {
                return Some(text.to_string());
            }
            return None;
        })
        .collect::<Vec<String>>()
        .join("");
}

const PROMPT: &str = "Explain ownership in Rust";

#[tokio::test]
async fn it_rejects_out_of_range_input_without_network() {
    let mut h = harness(vec![], vec![], OrchestratorSettings::default());
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    for input in ["too short".to_string(), "x".repeat(1001), "".to_string()] {
        let res = h
            .orchestrator
            .submit(&input, "gpt-4o-mini", CancellationToken::new(), &tx)
            .await;
        assert!(matches!(res, Err(GenerationError::Validation(_))));
    }

    assert!(h.requests.lock().unwrap().is_empty());
    assert_eq!(h.challenges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn it_accepts_boundary_lengths() {
    let mut h = harness(vec![], vec![], OrchestratorSettings::default());
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    for input in ["x".repeat(10), "é".repeat(1000)] {
        let res = h
            .orchestrator
            .submit(&input, "gpt-4o-mini", CancellationToken::new(), &tx)
            .await;
        assert!(res.is_ok());
    }
    assert_eq!(h.requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn it_streams_text_and_usage_then_saves_once() {
    let body = chunked(&streamed_body_fixture(), 5)
        .into_iter()
        .map(|chunk| return String::from_utf8(chunk).unwrap())
        .collect();
    let mut h = harness(
        vec![Reply::Body(200, body)],
        vec![],
        OrchestratorSettings::default(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let exchange = h
        .orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await
        .unwrap()
        .unwrap();
    h.orchestrator.wait_for_saves().await;

    let events = drain(&mut rx);
    assert!(matches!(events[0], Event::VerificationRequested()));
    assert!(matches!(events[1], Event::GenerationStarted(_)));
    assert!(matches!(
        events.last().unwrap(),
        Event::GenerationCompleted(Some(_))
    ));
    assert_eq!(streamed_text(&events), "Hello world");

    let usage_events = events
        .iter()
        .filter(|event| return matches!(event, Event::UsageUpdated(_)))
        .count();
    assert_eq!(usage_events, 1);

    assert_eq!(exchange.input_text, PROMPT);
    assert_eq!(exchange.output_text, "Hello world");
    assert_eq!(
        h.orchestrator.usage(),
        Some(&UsageSnapshot::new(3, 10, UserType::Free))
    );
    assert_eq!(h.saves.load(Ordering::SeqCst), 1);
    assert_eq!(h.orchestrator.gate_state(), GateState::Idle);
    assert!(!h.orchestrator.has_active_session());
}

#[tokio::test]
async fn it_orders_text_before_usage_as_received() {
    let mut h = harness(
        vec![Reply::Body(200, vec![streamed_body_fixture()])],
        vec![],
        OrchestratorSettings::default(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    h.orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await
        .unwrap();

    let order = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            Event::GenerationText(text) => return Some(text),
            Event::UsageUpdated(_) => return Some("<usage>".to_string()),
            _ => return None,
        })
        .collect::<Vec<String>>();
    assert_eq!(order, vec!["Hello ", "<usage>", "world"]);
}

#[tokio::test]
async fn it_never_reuses_a_verification_token() {
    let mut h = harness(vec![], vec![], OrchestratorSettings::default());
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    for _ in 0..2 {
        h.orchestrator
            .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
            .await
            .unwrap();
    }

    let tokens = h
        .requests
        .lock()
        .unwrap()
        .iter()
        .map(|body| return body.turnstile_token.to_string())
        .collect::<Vec<String>>();
    assert_eq!(tokens, vec!["token-1", "token-2"]);
    assert_eq!(h.challenges.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn it_discards_the_token_after_a_failed_attempt() {
    let mut h = harness(
        vec![Reply::Body(503, vec!["upstream down".to_string()])],
        vec![],
        OrchestratorSettings::default(),
    );
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    let first = h
        .orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await;
    assert!(matches!(first, Err(GenerationError::Server { status: 503, .. })));

    h.orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await
        .unwrap();

    let requests = h.requests.lock().unwrap();
    assert_ne!(requests[0].turnstile_token, requests[1].turnstile_token);
}

#[tokio::test]
async fn it_classifies_premium_denial_without_rearming() {
    let mut h = harness(
        vec![Reply::Body(
            403,
            vec![r#"{"error":"Premium model","requiresUpgrade":true,"modelId":"gpt-4"}"#.to_string()],
        )],
        vec![],
        OrchestratorSettings::default(),
    );
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    let res = h
        .orchestrator
        .submit(PROMPT, "gpt-4", CancellationToken::new(), &tx)
        .await;

    assert_eq!(
        res,
        Err(GenerationError::PremiumRequired {
            model_id: "gpt-4".to_string()
        })
    );
    assert_eq!(h.challenges.load(Ordering::SeqCst), 1);
    assert_eq!(h.orchestrator.gate_state(), GateState::Idle);
    assert!(!h.orchestrator.is_pending_generation());
    h.orchestrator.wait_for_saves().await;
    assert_eq!(h.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn it_surfaces_quota_exceeded_with_exact_usage() {
    let mut h = harness(
        vec![Reply::Body(
            429,
            vec![r#"{"error":"Daily limit reached","usageInfo":{"used":3,"limit":3,"remaining":0,"userType":"guest","canUse":false}}"#.to_string()],
        )],
        vec![],
        OrchestratorSettings::default(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let res = h
        .orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await;

    match res {
        Err(GenerationError::QuotaExceeded(usage)) => {
            assert_eq!(usage.remaining, 0);
            assert_eq!(usage.limit, 3);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        drain(&mut rx).last().unwrap(),
        Event::GenerationFailed(GenerationError::QuotaExceeded(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn it_times_out_without_persisting() {
    let mut h = harness(vec![Reply::Hang], vec![], OrchestratorSettings::default());
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    let res = h
        .orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await;

    assert_eq!(res, Err(GenerationError::Timeout));
    assert!(res.unwrap_err().is_retryable());
    h.orchestrator.wait_for_saves().await;
    assert_eq!(h.saves.load(Ordering::SeqCst), 0);
    assert!(!h.orchestrator.has_active_session());
    assert_eq!(h.orchestrator.gate_state(), GateState::Idle);
}

#[tokio::test(start_paused = true)]
async fn it_times_out_mid_stream() {
    let mut h = harness(
        vec![Reply::FirstThenHang("partial ".to_string())],
        vec![],
        OrchestratorSettings::default(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let res = h
        .orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await;

    assert_eq!(res, Err(GenerationError::Timeout));
    assert_eq!(streamed_text(&drain(&mut rx)), "partial ");
    h.orchestrator.wait_for_saves().await;
    assert_eq!(h.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn it_cancels_mid_stream_without_persisting() {
    let mut h = harness(
        vec![Reply::FirstThenHang("partial ".to_string())],
        vec![],
        OrchestratorSettings::default(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let cancel = CancellationToken::new();

    let watcher = async {
        while let Some(event) = rx.recv().await {
            if let Event::GenerationText(_) = event {
                cancel.cancel();
                break;
            }
        }
    };
    let (res, _) = tokio::join!(
        h.orchestrator
            .submit(PROMPT, "gpt-4o-mini", cancel.clone(), &tx),
        watcher
    );

    assert_eq!(res, Err(GenerationError::Cancelled));
    h.orchestrator.wait_for_saves().await;
    assert_eq!(h.saves.load(Ordering::SeqCst), 0);
    assert!(!h.orchestrator.has_active_session());
}

#[tokio::test]
async fn it_rearms_verification_while_pending() {
    let mut h = harness(
        vec![],
        vec![
            ChallengeOutcome::Expired,
            ChallengeOutcome::Error("widget crashed".to_string()),
        ],
        OrchestratorSettings::default(),
    );
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    let res = h
        .orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await;

    assert!(res.is_ok());
    assert_eq!(h.challenges.load(Ordering::SeqCst), 3);
    assert_eq!(h.requests.lock().unwrap()[0].turnstile_token, "token-3");
    assert!(!h.orchestrator.is_pending_generation());
}

#[tokio::test]
async fn it_gives_up_verification_after_max_attempts() {
    let mut h = harness(
        vec![],
        vec![
            ChallengeOutcome::Error("one".to_string()),
            ChallengeOutcome::Error("two".to_string()),
            ChallengeOutcome::Error("three".to_string()),
        ],
        OrchestratorSettings::default(),
    );
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    let res = h
        .orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await;

    assert_eq!(
        res,
        Err(GenerationError::VerificationFailed("three".to_string()))
    );
    assert!(h.requests.lock().unwrap().is_empty());
    assert!(!h.orchestrator.is_pending_generation());
}

#[tokio::test]
async fn it_requires_sign_in_and_keeps_the_draft() -> Result<()> {
    let settings = OrchestratorSettings {
        allow_anonymous: false,
        ..OrchestratorSettings::default()
    };
    let mut h = harness(vec![], vec![], settings);
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    let res = h
        .orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await;

    assert_eq!(res, Err(GenerationError::AuthRequired));
    assert!(h.requests.lock().unwrap().is_empty());
    assert_eq!(h.challenges.load(Ordering::SeqCst), 0);
    assert_eq!(h.client_state.take_draft().await?, Some(PROMPT.to_string()));

    return Ok(());
}

#[tokio::test]
async fn it_sends_identity_with_request() {
    let settings = OrchestratorSettings {
        identity: Some("user-42".to_string()),
        allow_anonymous: false,
        ..OrchestratorSettings::default()
    };
    let mut h = harness(vec![], vec![], settings);
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    let exchange = h
        .orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(exchange.identity, Some("user-42".to_string()));
    let requests = h.requests.lock().unwrap();
    assert_eq!(requests[0].user_id, Some("user-42".to_string()));
    assert_eq!(requests[0].model_id, "gpt-4o-mini");
    assert_eq!(requests[0].text_str, PROMPT);
}

#[tokio::test]
async fn it_retries_the_last_attempt() {
    let mut h = harness(
        vec![Reply::Body(500, vec![r#"{"error":"boom"}"#.to_string()])],
        vec![],
        OrchestratorSettings::default(),
    );
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    let first = h
        .orchestrator
        .submit(PROMPT, "gpt-4", CancellationToken::new(), &tx)
        .await;
    assert!(first.unwrap_err().is_retryable());
    assert_eq!(
        h.orchestrator.last_attempt(),
        Some(&LastAttempt {
            input_text: PROMPT.to_string(),
            model_id: "gpt-4".to_string(),
        })
    );

    let second = h
        .orchestrator
        .retry(CancellationToken::new(), &tx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.output_text, "A fine answer.");

    let requests = h.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].text_str, PROMPT);
    assert_eq!(requests[1].model_id, "gpt-4");
}

#[tokio::test]
async fn it_has_nothing_to_retry_initially() {
    let mut h = harness(vec![], vec![], OrchestratorSettings::default());
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    let res = h.orchestrator.retry(CancellationToken::new(), &tx).await;
    assert!(matches!(res, Err(GenerationError::Validation(_))));
    assert!(h.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn it_skips_persistence_for_empty_output() {
    let mut h = harness(
        vec![Reply::Body(200, vec![])],
        vec![],
        OrchestratorSettings::default(),
    );
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();

    let res = h
        .orchestrator
        .submit(PROMPT, "gpt-4o-mini", CancellationToken::new(), &tx)
        .await;

    assert_eq!(res, Ok(None));
    h.orchestrator.wait_for_saves().await;
    assert_eq!(h.saves.load(Ordering::SeqCst), 0);
}
