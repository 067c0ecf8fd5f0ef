//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the agent's transaction records and
//! the local protocol operations. All endpoints share application state
//! through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                                  | Description                        |
//! |--------|---------------------------------------|------------------------------------|
//! | GET    | `/health`                             | Liveness probe                     |
//! | GET    | `/status`                             | Agent status summary               |
//! | GET    | `/ws`                                 | WebSocket stream of protocol events|
//! | GET    | `/connections`                        | Known connections                  |
//! | POST   | `/connections`                        | Register a connection              |
//! | GET    | `/transactions`                       | Records, filtered by query tags    |
//! | GET    | `/transactions/:tran_id`              | Record by id                       |
//! | POST   | `/transactions/create-request`        | Author: request an endorsement     |
//! | POST   | `/transactions/:tran_id/endorse`      | Endorser: sign                     |
//! | POST   | `/transactions/:tran_id/refuse`       | Endorser: decline                  |
//! | POST   | `/transactions/:tran_id/cancel`       | Author: withdraw                   |
//! | POST   | `/transactions/:tran_id/resend`       | Author: ask again                  |
//! | POST   | `/transaction/:tran_id/resend`        | Legacy alias of the above          |
//! | GET    | `/transactions/:tran_id/ledger-write` | Endorsed payload for the ledger    |
//! | POST   | `/inbound/:conn_id`                   | Raw protocol message from a peer   |
//!
//! A failed precondition answers 200 with an `{"error": ...}` body, which
//! existing clients of this API depend on. A transition that was stored but
//! not queued for the peer answers 200 with the record and a
//! `dispatch_error` field.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use endorse_protocol::ledger::endorsed_write;
use endorse_protocol::manager::{ManagerResult, Transition};
use endorse_protocol::storage::TagFilter;
use endorse_protocol::{
    ConnectionRecord, ConnectionRegistry, ErrorKind, InboundHandler, ManagerError, NewRequest,
    TransactionManager, TransactionRecord, TransactionRole, TransactionType,
};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Local protocol operations and record queries.
    pub manager: Arc<TransactionManager>,
    /// Applies inbound protocol messages.
    pub handler: Arc<InboundHandler>,
    /// The same table the manager resolves connections from.
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: SharedMetrics,
    /// The node's reported version string.
    pub version: String,
    pub label: String,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/ws", get(ws_handler))
        .route(
            "/connections",
            get(list_connections_handler).post(register_connection_handler),
        )
        .route("/transactions", get(list_transactions_handler))
        .route("/transactions/create-request", post(create_request_handler))
        .route("/transactions/:tran_id", get(transaction_handler))
        .route("/transactions/:tran_id/endorse", post(endorse_handler))
        .route("/transactions/:tran_id/refuse", post(refuse_handler))
        .route("/transactions/:tran_id/cancel", post(cancel_handler))
        .route("/transactions/:tran_id/resend", post(resend_handler))
        .route("/transaction/:tran_id/resend", post(resend_handler))
        .route("/transactions/:tran_id/ledger-write", get(ledger_write_handler))
        .route("/inbound/:conn_id", post(inbound_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub label: String,
    /// Hex-encoded Ed25519 key endorsements are signed with.
    pub verkey: String,
    pub connections: usize,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Error body. Also used for precondition failures answered with 200.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A transition that was stored but whose message could not be queued.
#[derive(Debug, Serialize)]
pub struct UndeliveredTransition<'a> {
    #[serde(flatten)]
    pub record: &'a TransactionRecord,
    pub dispatch_error: String,
}

/// Response payload for `GET /transactions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub results: Vec<T>,
}

/// Tag filters accepted by `GET /transactions`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
    pub connection_id: Option<String>,
    pub thread_id: Option<String>,
    pub transaction_type: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> TagFilter {
        let mut filter = TagFilter::new();
        for (name, value) in [
            ("state", self.state),
            ("connection_id", self.connection_id),
            ("thread_id", self.thread_id),
            ("transaction_type", self.transaction_type),
        ] {
            if let Some(value) = value {
                filter = filter.with(name, value);
            }
        }
        filter
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRequestQuery {
    pub transaction_type: Option<String>,
}

/// Body of `POST /transactions/create-request`.
#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub conn_id: String,
    /// The ledger operation to be endorsed.
    pub transaction_message: Map<String, Value>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub expires_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefuseBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body of `POST /connections`.
#[derive(Debug, Deserialize)]
pub struct RegisterConnectionBody {
    #[serde(default)]
    pub connection_id: Option<String>,
    pub label: String,
    /// `TRANSACTION_AUTHOR` or `TRANSACTION_ENDORSER` (or `author` / `endorser`).
    pub my_role: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — agent identity and connection count.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: state.version.clone(),
        label: state.label.clone(),
        verkey: state.manager.verkey().as_str().to_string(),
        connections: state.registry.list().len(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// `GET /connections`
async fn list_connections_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(ListResponse {
        results: state.registry.list(),
    })
}

/// `POST /connections` — add or replace a connection and our role on it.
async fn register_connection_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterConnectionBody>,
) -> Response {
    let role: TransactionRole = match body.my_role.parse() {
        Ok(role) => role,
        Err(e) => return bad_request(e),
    };
    let record = match body.connection_id {
        Some(id) => ConnectionRecord::with_id(id, body.label, role),
        None => ConnectionRecord::new(body.label, role),
    };
    let record = state.registry.register(record);
    tracing::info!(connection_id = %record.connection_id, my_role = %role, "connection registered");
    (StatusCode::CREATED, Json(record)).into_response()
}

/// `GET /transactions` — records matching every supplied tag.
async fn list_transactions_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.manager.list(&query.into_filter()).await {
        Ok(results) => Json(ListResponse { results }).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /transactions/:tran_id`
async fn transaction_handler(
    Path(tran_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.manager.retrieve(&tran_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /transactions/create-request?transaction_type=SCHEMA`
async fn create_request_handler(
    State(state): State<AppState>,
    Query(query): Query<CreateRequestQuery>,
    Json(body): Json<CreateRequestBody>,
) -> Response {
    let transaction_type: TransactionType = match query.transaction_type.as_deref() {
        Some(raw) => match raw.parse() {
            Ok(ty) => ty,
            Err(e) => return bad_request(e),
        },
        None => return bad_request("missing transaction_type query parameter"),
    };

    let mut request = NewRequest::new(body.conn_id, transaction_type, body.transaction_message);
    request.comment = body.comment;
    request.expires_time = body.expires_time;

    let _timer = state.metrics.transition_latency_seconds.start_timer();
    let result = state.manager.create_request(request).await;
    send_transition(&state, result).await
}

/// `POST /transactions/:tran_id/endorse`
async fn endorse_handler(Path(tran_id): Path<String>, State(state): State<AppState>) -> Response {
    let _timer = state.metrics.transition_latency_seconds.start_timer();
    let result = state.manager.create_endorse_response(&tran_id).await;
    send_transition(&state, result).await
}

/// `POST /transactions/:tran_id/refuse` with optional `{"reason": ...}`.
async fn refuse_handler(
    Path(tran_id): Path<String>,
    State(state): State<AppState>,
    body: Option<Json<RefuseBody>>,
) -> Response {
    let reason = body.and_then(|Json(b)| b.reason);
    let _timer = state.metrics.transition_latency_seconds.start_timer();
    let result = state.manager.create_refuse_response(&tran_id, reason).await;
    send_transition(&state, result).await
}

/// `POST /transactions/:tran_id/cancel`
async fn cancel_handler(Path(tran_id): Path<String>, State(state): State<AppState>) -> Response {
    let _timer = state.metrics.transition_latency_seconds.start_timer();
    let result = state.manager.cancel_transaction(&tran_id).await;
    send_transition(&state, result).await
}

/// `POST /transactions/:tran_id/resend`
async fn resend_handler(Path(tran_id): Path<String>, State(state): State<AppState>) -> Response {
    let _timer = state.metrics.transition_latency_seconds.start_timer();
    let result = state.manager.transaction_resend(&tran_id).await;
    send_transition(&state, result).await
}

/// `GET /transactions/:tran_id/ledger-write` — the operation and signatures
/// of an endorsed record. Unendorsed records answer 200 with an error body.
async fn ledger_write_handler(
    Path(tran_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let record = match state.manager.retrieve(&tran_id).await {
        Ok(record) => record,
        Err(e) => return error_response(e),
    };
    match endorsed_write(&record) {
        Ok(write) => Json(write).into_response(),
        Err(e) => (
            StatusCode::OK,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// `POST /inbound/:conn_id` — accept a raw protocol message from the peer on
/// `conn_id`. The message is applied on its own task; the outcome is only
/// visible through the event stream.
async fn inbound_handler(
    Path(conn_id): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    let handler = Arc::clone(&state.handler);
    tokio::spawn(async move {
        handler.handle_raw(&conn_id, &body).await;
    });
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
}

/// `GET /ws` — WebSocket upgrade for live protocol events.
///
/// Clients receive JSON-encoded `ProtocolEvent`s. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.manager.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response Helpers
// ---------------------------------------------------------------------------

/// Queue the outbound message of a successful transition and answer with
/// the stored record. The record has already been persisted, so a queueing
/// failure does not turn the answer into an error.
async fn send_transition(state: &AppState, result: ManagerResult<Transition>) -> Response {
    let (record, outbound) = match result {
        Ok(transition) => transition,
        Err(e) => return error_response(e),
    };
    match state.manager.dispatch(&outbound).await {
        Ok(()) => Json(record).into_response(),
        Err(e) => {
            tracing::warn!(
                transaction_id = %record.transaction_id(),
                connection_id = %outbound.connection_id,
                error = %e,
                "transition stored but outbound message not queued"
            );
            Json(UndeliveredTransition {
                record: &record,
                dispatch_error: e.to_string(),
            })
            .into_response()
        }
    }
}

fn error_response(err: ManagerError) -> Response {
    let status = match err.kind() {
        ErrorKind::Precondition => StatusCode::OK,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Malformed | ErrorKind::ProtocolViolation => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => {
            tracing::error!(error = %err, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn bad_request(err: impl ToString) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use endorse_protocol::crypto::AgentKeypair;
    use endorse_protocol::outbound::{OutboundTransport, RecordingTransport};
    use endorse_protocol::storage::{EndorseDb, MemoryCache};
    use endorse_protocol::{LocalIdentity, ManagerContext, ProtocolEvent, TransactionState};
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Connection on which this node is the author.
    const TO_ENDORSER: &str = "to-endorser";
    /// Connection on which this node is the endorser.
    const FROM_AUTHOR: &str = "from-author";

    /// A node that is author on one connection and endorser on another,
    /// with outbound messages captured instead of sent.
    fn test_app_state() -> (AppState, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        (app_state_with(transport.clone()), transport)
    }

    fn app_state_with(transport: Arc<dyn OutboundTransport>) -> AppState {
        let registry = Arc::new(ConnectionRegistry::new());
        registry.register(ConnectionRecord::with_id(
            TO_ENDORSER,
            "endorser",
            TransactionRole::Author,
        ));
        registry.register(ConnectionRecord::with_id(
            FROM_AUTHOR,
            "author",
            TransactionRole::Endorser,
        ));
        let ctx = ManagerContext::new(
            Arc::new(EndorseDb::open_temporary().expect("temp db")),
            Arc::new(MemoryCache::new()),
            registry.clone(),
            transport,
            LocalIdentity::new("api-test", AgentKeypair::generate()),
        );
        let manager = Arc::new(TransactionManager::new(ctx));
        AppState {
            handler: Arc::new(InboundHandler::new(Arc::clone(&manager))),
            manager,
            registry,
            metrics: Arc::new(crate::metrics::NodeMetrics::new()),
            version: "0.1.0-test".into(),
            label: "api-test".into(),
        }
    }

    /// Sends a GET request and returns (status, body as JSON).
    async fn get(router: &Router, path: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        send(router, req).await
    }

    /// Sends a POST request with a JSON body and returns (status, body as JSON).
    async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        send(router, req).await
    }

    /// Sends a POST request without a body.
    async fn post_empty(router: &Router, path: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        send(router, req).await
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn create_body() -> Value {
        json!({
            "conn_id": TO_ENDORSER,
            "transaction_message": {"operation": {"type": "101", "data": {"name": "degree"}}},
            "comment": "please endorse"
        })
    }

    async fn create_request(router: &Router) -> Value {
        let (status, body) = post_json(
            router,
            "/transactions/create-request?transaction_type=SCHEMA",
            create_body(),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    /// Loop the captured request back in on the endorser connection and wait
    /// for it to be applied. Returns the endorser-side transaction id.
    async fn deliver_to_self(
        state: &AppState,
        router: &Router,
        transport: &RecordingTransport,
    ) -> String {
        let mut events = state.manager.subscribe();
        let sent = transport.take();
        let raw = sent.last().unwrap().message.to_json().unwrap();
        let req = Request::builder()
            .method("POST")
            .uri(format!("/inbound/{FROM_AUTHOR}"))
            .body(Body::from(raw))
            .unwrap();
        let (status, _) = send(router, req).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let ProtocolEvent::TransitionApplied {
                    transaction_id,
                    role: TransactionRole::Endorser,
                    ..
                } = events.recv().await.unwrap()
                {
                    return transaction_id;
                }
            }
        })
        .await
        .expect("inbound request applied")
    }

    // -- Liveness -------------------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_identity() {
        let (state, _) = test_app_state();
        let verkey = state.manager.verkey();
        let router = create_router(state);
        let (status, body) = get(&router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verkey"], verkey.as_str());
        assert_eq!(body["connections"], 2);
    }

    // -- Connections ----------------------------------------------------------

    #[tokio::test]
    async fn register_and_list_connections() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, body) = post_json(
            &router,
            "/connections",
            json!({"connection_id": "c3", "label": "Registry", "my_role": "endorser"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["my_role"], "TRANSACTION_ENDORSER");

        let (_, body) = get(&router, "/connections").await;
        assert_eq!(body["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn register_connection_rejects_unknown_role() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, body) = post_json(
            &router,
            "/connections",
            json!({"label": "x", "my_role": "witness"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    // -- Author operations ----------------------------------------------------

    #[tokio::test]
    async fn create_request_stores_record_and_queues_message() {
        let (state, transport) = test_app_state();
        let router = create_router(state);
        let body = create_request(&router).await;

        assert_eq!(body["state"], "request");
        assert_eq!(body["transaction_type"], "SCHEMA");
        assert_eq!(body["comment"], "please endorse");
        assert_eq!(transport.sent().len(), 1);

        let id = body["transaction_id"].as_str().unwrap();
        let (status, fetched) = get(&router, &format!("/transactions/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["thread_id"], body["thread_id"]);
    }

    #[tokio::test]
    async fn create_request_rejects_bad_transaction_type() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, _) = post_json(
            &router,
            "/transactions/create-request?transaction_type=NYM",
            create_body(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            post_json(&router, "/transactions/create-request", create_body()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_request_on_unknown_connection_is_404() {
        let (state, transport) = test_app_state();
        let router = create_router(state);
        let mut body = create_body();
        body["conn_id"] = json!("nobody");
        let (status, _) = post_json(
            &router,
            "/transactions/create-request?transaction_type=SCHEMA",
            body,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_transaction_is_404() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, body) = get(&router, "/transactions/does-not-exist").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("does-not-exist"));
        let (status, _) = post_empty(&router, "/transactions/does-not-exist/cancel").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_then_resend_on_legacy_path() {
        let (state, transport) = test_app_state();
        let router = create_router(state);
        let id = create_request(&router).await["transaction_id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, body) = post_empty(&router, &format!("/transactions/{id}/cancel")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "cancel");

        let (status, body) = post_empty(&router, &format!("/transaction/{id}/resend")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "resend");
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn endorse_on_author_record_answers_error_with_200() {
        let (state, transport) = test_app_state();
        let router = create_router(state);
        let id = create_request(&router).await["transaction_id"]
            .as_str()
            .unwrap()
            .to_string();
        transport.take();

        let (status, body) = post_empty(&router, &format!("/transactions/{id}/endorse")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].is_string());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn closed_outbound_queue_still_returns_stored_record() {
        let (transport, outbox) = endorse_protocol::QueuedTransport::new();
        drop(outbox);
        let state = app_state_with(Arc::new(transport));
        let router = create_router(state);

        let (status, body) = post_json(
            &router,
            "/transactions/create-request?transaction_type=SCHEMA",
            create_body(),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["state"], "request");
        assert!(body["dispatch_error"].as_str().unwrap().contains("closed"));

        let id = body["transaction_id"].as_str().unwrap();
        let (status, fetched) = get(&router, &format!("/transactions/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["state"], "request");
        assert!(fetched.get("dispatch_error").is_none());
    }

    #[tokio::test]
    async fn list_filters_by_state() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let first = create_request(&router).await;
        create_request(&router).await;
        let id = first["transaction_id"].as_str().unwrap();
        post_empty(&router, &format!("/transactions/{id}/cancel")).await;

        let (_, all) = get(&router, "/transactions").await;
        assert_eq!(all["results"].as_array().unwrap().len(), 2);

        let (status, cancelled) = get(&router, "/transactions?state=cancel").await;
        assert_eq!(status, StatusCode::OK);
        let results = cancelled["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["transaction_id"], first["transaction_id"]);
    }

    // -- Endorser operations --------------------------------------------------

    #[tokio::test]
    async fn inbound_request_then_endorse_once() {
        let (state, transport) = test_app_state();
        let router = create_router(state.clone());
        create_request(&router).await;
        let e_id = deliver_to_self(&state, &router, &transport).await;

        let (status, body) = post_empty(&router, &format!("/transactions/{e_id}/endorse")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "endorse");
        assert_eq!(body["role"], "TRANSACTION_ENDORSER");

        let (status, body) = post_empty(&router, &format!("/transactions/{e_id}/endorse")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].as_str().unwrap().contains("endorse"));
        assert_eq!(transport.sent().len(), 1);

        let record = state.manager.retrieve(&e_id).await.unwrap();
        assert_eq!(record.state(), TransactionState::Endorse);
    }

    #[tokio::test]
    async fn refuse_records_reason() {
        let (state, transport) = test_app_state();
        let router = create_router(state.clone());
        create_request(&router).await;
        let e_id = deliver_to_self(&state, &router, &transport).await;

        let (status, body) = post_json(
            &router,
            &format!("/transactions/{e_id}/refuse"),
            json!({"reason": "schema exists"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "refuse");
        assert_eq!(body["refusal_reason"], "schema exists");
    }

    #[tokio::test]
    async fn ledger_write_requires_endorsement() {
        let (state, transport) = test_app_state();
        let router = create_router(state.clone());
        let a_id = create_request(&router).await["transaction_id"]
            .as_str()
            .unwrap()
            .to_string();
        let (status, body) = get(&router, &format!("/transactions/{a_id}/ledger-write")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].as_str().unwrap().contains("not endorsed"));

        // Endorse locally, then loop the response back in on the author side.
        let e_id = deliver_to_self(&state, &router, &transport).await;
        post_empty(&router, &format!("/transactions/{e_id}/endorse")).await;
        let response = transport.take().pop().unwrap().message.to_json().unwrap();
        let outcome = state.handler.handle_raw(TO_ENDORSER, &response).await;
        assert!(outcome.is_applied());

        let (status, body) = get(&router, &format!("/transactions/{a_id}/ledger-write")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["operation"]["operation"]["type"], "101");
        assert_eq!(body["signatures"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_inbound_is_accepted_and_reported() {
        let (state, _) = test_app_state();
        let mut events = state.manager.subscribe();
        let router = create_router(state);
        let req = Request::builder()
            .method("POST")
            .uri(format!("/inbound/{FROM_AUTHOR}"))
            .body(Body::from("not json"))
            .unwrap();
        let (status, _) = send(&router, req).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ProtocolEvent::MalformedMessage { .. }));
    }
}
