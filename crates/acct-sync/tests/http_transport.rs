//! HttpTransport against a local axum server.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acct_sync::validate::RecordValidator;
use acct_sync::{
    partition, Batch, CleanRecord, Config, EntityKind, EntitySpec, HttpTransport, RawRecord,
    SyncError, SyncTransport,
};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;

// =============================================================================
// Test server
// =============================================================================

#[derive(Debug, Clone)]
struct Seen {
    entity: String,
    query: HashMap<String, String>,
    content_type: Option<String>,
    user_agent: Option<String>,
    body: serde_json::Value,
}

#[derive(Clone, Default)]
struct ServerState {
    seen: Arc<Mutex<Vec<Seen>>>,
    /// Responses served in order; 201 with a message once exhausted.
    script: Arc<Mutex<VecDeque<(u16, String)>>>,
    delay: Option<Duration>,
    /// `Retry-After` value sent with every non-success response.
    retry_after: Option<&'static str>,
}

impl ServerState {
    fn scripted(responses: &[(u16, &str)]) -> Self {
        Self {
            script: Arc::new(Mutex::new(
                responses
                    .iter()
                    .map(|(s, b)| (*s, b.to_string()))
                    .collect(),
            )),
            ..Self::default()
        }
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

async fn sync_handler(
    State(state): State<ServerState>,
    Path(entity): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, HeaderMap, String) {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.seen.lock().unwrap().push(Seen {
        entity,
        query,
        content_type: header_str(header::CONTENT_TYPE),
        user_agent: header_str(header::USER_AGENT),
        body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
    });

    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }

    let (status, body) = state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or((201, r#"{"message":"stored"}"#.to_string()));
    let mut response_headers = HeaderMap::new();
    if let Some(value) = state.retry_after.filter(|_| status >= 300) {
        response_headers.insert(header::RETRY_AFTER, value.parse().unwrap());
    }
    (StatusCode::from_u16(status).unwrap(), response_headers, body)
}

async fn spawn_server(state: ServerState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/api/sync/:entity", post(sync_handler))
        .with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// =============================================================================
// Helpers
// =============================================================================

fn config(base_url: &str) -> Config {
    Config::from_yaml(&format!(
        r#"
source:
  dsn: ACCOUNTS
api:
  base_url: {}
  client_id: branch-7
  timeout_secs: 5
  backoff_factor_secs: 0.01
"#,
        base_url
    ))
    .unwrap()
}

fn master_records(entity: &EntitySpec, n: usize) -> Vec<CleanRecord> {
    let validator = entity.validator();
    (0..n)
        .map(|i| {
            let raw = RawRecord::new()
                .with("code", format!("A{:03}", i))
                .with("name", "Cash")
                .with("closing_balance", "10.5");
            validator.validate(&raw).unwrap()
        })
        .collect()
}

async fn setup(state: ServerState) -> (HttpTransport, EntitySpec) {
    let base_url = spawn_server(state).await;
    let config = config(&base_url);
    let transport = HttpTransport::new(&config.api).unwrap();
    let master = EntitySpec::resolve(EntityKind::Master, &config).unwrap();
    (transport, master)
}

const TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Request shape
// =============================================================================

#[tokio::test]
async fn test_first_batch_has_no_flags() {
    let state = ServerState::default();
    let (transport, master) = setup(state.clone()).await;
    let records = master_records(&master, 2);

    let delivery = transport
        .send_batch(&master, &Batch::whole(&records), true, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(delivery.status, 201);
    assert_eq!(delivery.message.as_deref(), Some("stored"));

    let seen = state.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].entity, "master");
    assert_eq!(seen[0].query.get("client_id").map(String::as_str), Some("branch-7"));
    assert!(!seen[0].query.contains_key("append"));
    assert!(!seen[0].query.contains_key("force_clear"));
    assert_eq!(seen[0].content_type.as_deref(), Some("application/json"));
    assert!(seen[0]
        .user_agent
        .as_deref()
        .unwrap()
        .starts_with("acct-sync/"));

    let body = seen[0].body.as_array().unwrap();
    assert_eq!(body.len(), 2);
    assert_eq!(body[0]["code"], "A000");
    assert_eq!(body[1]["closing_balance"], 10.5);
    assert!(body[0]["opening_balance"].is_null());
}

#[tokio::test]
async fn test_later_batches_append() {
    let state = ServerState::default();
    let (transport, master) = setup(state.clone()).await;
    let records = master_records(&master, 5);
    let batches = partition(&records, std::num::NonZeroUsize::new(2).unwrap());

    for batch in &batches {
        transport
            .send_batch(&master, batch, batch.is_first(), TIMEOUT)
            .await
            .unwrap();
    }

    let appends: Vec<_> = state
        .seen()
        .iter()
        .map(|s| s.query.get("append").cloned())
        .collect();
    assert_eq!(
        appends,
        vec![None, Some("true".to_string()), Some("true".to_string())]
    );
}

#[tokio::test]
async fn test_clear_sends_empty_array() {
    let state = ServerState::default();
    let (transport, master) = setup(state.clone()).await;

    transport.clear_remote(&master).await.unwrap();

    let seen = state.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0].query.get("force_clear").map(String::as_str),
        Some("true")
    );
    assert_eq!(seen[0].body, serde_json::json!([]));
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_retries_transient_status_then_succeeds() {
    let state = ServerState::scripted(&[(503, "busy"), (429, "slow down"), (200, "{}")]);
    let (transport, master) = setup(state.clone()).await;
    let records = master_records(&master, 1);

    let delivery = transport
        .send_batch(&master, &Batch::whole(&records), true, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(delivery.status, 200);
    assert_eq!(delivery.message, None);
    assert_eq!(state.seen().len(), 3);
}

#[tokio::test]
async fn test_retries_exhausted_after_four_attempts() {
    let state = ServerState::scripted(&[
        (500, "e1"),
        (500, "e2"),
        (502, "e3"),
        (500, r#"{"error":"database locked"}"#),
        (201, "{}"),
    ]);
    let (transport, master) = setup(state.clone()).await;
    let records = master_records(&master, 1);

    let err = transport
        .send_batch(&master, &Batch::whole(&records), true, TIMEOUT)
        .await
        .unwrap_err();

    match err {
        SyncError::Rejected {
            status,
            message,
            body,
            ..
        } => {
            assert_eq!(status, 500);
            assert_eq!(message, "database locked");
            assert_eq!(body, r#"{"error":"database locked"}"#);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(state.seen().len(), 4);
}

#[tokio::test]
async fn test_retry_waits_for_retry_after() {
    let state = ServerState {
        retry_after: Some("1"),
        ..ServerState::scripted(&[(429, "slow down")])
    };
    let (transport, master) = setup(state.clone()).await;
    let records = master_records(&master, 1);

    let started = std::time::Instant::now();
    transport
        .send_batch(&master, &Batch::whole(&records), true, TIMEOUT)
        .await
        .unwrap();

    // First retry would be immediate without the header.
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(state.seen().len(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let state = ServerState::scripted(&[(400, "bad payload")]);
    let (transport, master) = setup(state.clone()).await;
    let records = master_records(&master, 1);

    let err = transport
        .send_batch(&master, &Batch::whole(&records), true, TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Rejected { status: 400, .. }));
    assert_eq!(state.seen().len(), 1);
}

#[tokio::test]
async fn test_timeout_is_not_retried() {
    let state = ServerState {
        delay: Some(Duration::from_secs(2)),
        ..ServerState::default()
    };
    let (transport, master) = setup(state.clone()).await;
    let records = master_records(&master, 1);

    let err = transport
        .send_batch(
            &master,
            &Batch::whole(&records),
            true,
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Timeout { .. }), "{:?}", err);
    assert_eq!(state.seen().len(), 1);
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = config(&format!("http://{}", addr));
    let transport = HttpTransport::new(&config.api).unwrap();
    let master = EntitySpec::resolve(EntityKind::Master, &config).unwrap();

    let err = transport.clear_remote(&master).await.unwrap_err();
    assert!(matches!(err, SyncError::Transport { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_probe_reports_status() {
    let (transport, _) = setup(ServerState::default()).await;
    assert_eq!(transport.probe().await.unwrap(), 200);
}
