//! End-to-end tests for the endorsement protocol.
//!
//! Two agents, each with its own store, cache, connection table and queued
//! transport. Messages travel only through the transports: a pump drains
//! one side's outbound queue into the other side's inbound handler, mapping
//! the connection id the way a real channel would.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use endorse_protocol::crypto::AgentKeypair;
use endorse_protocol::ledger::{endorsed_write, LedgerGateError};
use endorse_protocol::manager::ManagerContext;
use endorse_protocol::storage::{EndorseDb, MemoryCache, TagFilter};
use endorse_protocol::{
    ConnectionRecord, ConnectionRegistry, HandleOutcome, InboundHandler, InboundMessage,
    LocalIdentity, NewRequest, OutboundMessage, ProtocolEvent, ProtocolMessage, QueuedTransport,
    TransactionManager, TransactionRole, TransactionState, TransactionType,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// Connection id the author uses for the endorser.
const AUTHOR_SIDE: &str = "conn-author-to-endorser";
/// Connection id the endorser uses for the author.
const ENDORSER_SIDE: &str = "conn-endorser-to-author";

struct Agent {
    handler: Arc<InboundHandler>,
    outbox: UnboundedReceiver<OutboundMessage>,
}

impl Agent {
    fn new(label: &str, connection_id: &str, role: TransactionRole) -> Self {
        let registry = ConnectionRegistry::new();
        registry.register(ConnectionRecord::with_id(connection_id, "peer", role));
        let (transport, outbox) = QueuedTransport::new();
        let ctx = ManagerContext::new(
            Arc::new(EndorseDb::open_temporary().expect("temp db")),
            Arc::new(MemoryCache::new()),
            Arc::new(registry),
            Arc::new(transport),
            LocalIdentity::new(label, AgentKeypair::generate()),
        );
        let manager = Arc::new(TransactionManager::new(ctx));
        Self {
            handler: Arc::new(InboundHandler::new(manager)),
            outbox,
        }
    }

    fn manager(&self) -> &Arc<TransactionManager> {
        self.handler.manager()
    }
}

fn pair() -> (Agent, Agent) {
    (
        Agent::new("author", AUTHOR_SIDE, TransactionRole::Author),
        Agent::new("endorser", ENDORSER_SIDE, TransactionRole::Endorser),
    )
}

/// Move every queued message from `from` to `to`, arriving on `arrives_on`.
async fn pump(from: &mut Agent, to: &Agent, arrives_on: &str) -> Vec<HandleOutcome> {
    let mut outcomes = Vec::new();
    while let Ok(out) = from.outbox.try_recv() {
        let bytes = out.message.to_json().expect("encode");
        outcomes.push(to.handler.handle_raw(arrives_on, &bytes).await);
    }
    outcomes
}

fn schema_operation() -> Map<String, Value> {
    match json!({
        "operation": {
            "type": "101",
            "data": {"name": "university-degree", "version": "1.2", "attr_names": ["name", "gpa"]}
        }
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

async fn author_requests(author: &Agent) -> String {
    let (record, out) = author
        .manager()
        .create_request(NewRequest::new(
            AUTHOR_SIDE,
            TransactionType::Schema,
            schema_operation(),
        ))
        .await
        .expect("create request");
    author.manager().dispatch(&out).await.expect("dispatch");
    record.transaction_id().to_string()
}

async fn endorser_record_id(endorser: &Agent) -> String {
    let records = endorser
        .manager()
        .list(&TagFilter::new().with("connection_id", ENDORSER_SIDE))
        .await
        .unwrap();
    assert_eq!(records.len(), 1, "endorser should hold exactly one record");
    records[0].transaction_id().to_string()
}

// ---------------------------------------------------------------------------
// Lifecycle Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_endorse_and_write() {
    let (mut author, mut endorser) = pair();
    let a_id = author_requests(&author).await;

    let outcomes = pump(&mut author, &endorser, ENDORSER_SIDE).await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_applied());

    let e_id = endorser_record_id(&endorser).await;
    let (_, out) = endorser
        .manager()
        .create_endorse_response(&e_id)
        .await
        .unwrap();
    endorser.manager().dispatch(&out).await.unwrap();

    let outcomes = pump(&mut endorser, &author, AUTHOR_SIDE).await;
    assert!(outcomes[0].is_applied());

    let a_rec = author.manager().retrieve(&a_id).await.unwrap();
    assert_eq!(a_rec.state(), TransactionState::Endorse);
    assert_eq!(
        a_rec.signature_response()[0].signer_verkey,
        endorser.manager().verkey()
    );

    let write = endorsed_write(&a_rec).expect("endorsed record is writable");
    assert_eq!(write.operation, schema_operation());
    assert_eq!(write.signatures.len(), 1);
}

#[tokio::test]
async fn refuse_resend_then_endorse() {
    let (mut author, mut endorser) = pair();
    let a_id = author_requests(&author).await;
    pump(&mut author, &endorser, ENDORSER_SIDE).await;
    let e_id = endorser_record_id(&endorser).await;

    let (_, out) = endorser
        .manager()
        .create_refuse_response(&e_id, Some("version already on ledger".into()))
        .await
        .unwrap();
    endorser.manager().dispatch(&out).await.unwrap();
    pump(&mut endorser, &author, AUTHOR_SIDE).await;

    let a_rec = author.manager().retrieve(&a_id).await.unwrap();
    assert_eq!(a_rec.state(), TransactionState::Refuse);
    assert!(matches!(
        endorsed_write(&a_rec),
        Err(LedgerGateError::NotEndorsed { .. })
    ));

    // A refused transaction may be resent.
    let (resent, out) = author.manager().transaction_resend(&a_id).await.unwrap();
    assert_eq!(resent.state(), TransactionState::Resend);
    author.manager().dispatch(&out).await.unwrap();
    let outcomes = pump(&mut author, &endorser, ENDORSER_SIDE).await;
    assert!(outcomes[0].is_applied());
    assert_eq!(
        endorser.manager().retrieve(&e_id).await.unwrap().state(),
        TransactionState::Resend
    );

    let (_, out) = endorser
        .manager()
        .create_endorse_response(&e_id)
        .await
        .unwrap();
    endorser.manager().dispatch(&out).await.unwrap();
    pump(&mut endorser, &author, AUTHOR_SIDE).await;

    assert_eq!(
        author.manager().retrieve(&a_id).await.unwrap().state(),
        TransactionState::Endorse
    );
}

#[tokio::test]
async fn cancel_reaches_endorser_and_blocks_endorsement() {
    let (mut author, mut endorser) = pair();
    let a_id = author_requests(&author).await;
    pump(&mut author, &endorser, ENDORSER_SIDE).await;
    let e_id = endorser_record_id(&endorser).await;

    let (_, out) = author.manager().cancel_transaction(&a_id).await.unwrap();
    author.manager().dispatch(&out).await.unwrap();
    pump(&mut author, &endorser, ENDORSER_SIDE).await;

    assert_eq!(
        endorser.manager().retrieve(&e_id).await.unwrap().state(),
        TransactionState::Cancel
    );
    let err = endorser
        .manager()
        .create_endorse_response(&e_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), endorse_protocol::ErrorKind::Precondition);
    assert!(pump(&mut endorser, &author, AUTHOR_SIDE).await.is_empty());
}

// ---------------------------------------------------------------------------
// Failure Handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let (author, endorser) = pair();
    let (_, out) = author
        .manager()
        .create_request(NewRequest::new(
            AUTHOR_SIDE,
            TransactionType::CredentialDefinition,
            schema_operation(),
        ))
        .await
        .unwrap();

    let first = endorser
        .handler
        .handle(InboundMessage::new(ENDORSER_SIDE, out.message.clone()))
        .await;
    let second = endorser
        .handler
        .handle(InboundMessage::new(ENDORSER_SIDE, out.message))
        .await;

    match (first, second) {
        (HandleOutcome::Applied(a), HandleOutcome::Applied(b)) => {
            assert_eq!(a.transaction_id(), b.transaction_id())
        }
        other => panic!("both deliveries should apply, got {other:?}"),
    }
    endorser_record_id(&endorser).await;
}

#[tokio::test]
async fn response_from_wrong_connection_is_dropped() {
    let (mut author, mut endorser) = pair();
    let a_id = author_requests(&author).await;
    pump(&mut author, &endorser, ENDORSER_SIDE).await;
    let e_id = endorser_record_id(&endorser).await;

    let mut events = author.manager().subscribe();
    let (_, out) = endorser
        .manager()
        .create_endorse_response(&e_id)
        .await
        .unwrap();
    endorser.manager().dispatch(&out).await.unwrap();
    let outcomes = pump(&mut endorser, &author, "some-other-connection").await;

    assert!(!outcomes[0].is_applied());
    assert!(matches!(
        events.recv().await.unwrap(),
        ProtocolEvent::MessageDropped { .. }
    ));
    assert_eq!(
        author.manager().retrieve(&a_id).await.unwrap().state(),
        TransactionState::Request
    );
}

#[tokio::test]
async fn concurrent_inbound_on_different_transactions() {
    let (mut author, endorser) = pair();
    for _ in 0..8 {
        author_requests(&author).await;
    }

    let mut handles = Vec::new();
    while let Ok(out) = author.outbox.try_recv() {
        handles.push(
            endorser
                .handler
                .spawn(InboundMessage::new(ENDORSER_SIDE, out.message)),
        );
    }
    for outcome in futures::future::join_all(handles).await {
        assert!(outcome.unwrap().is_applied());
    }

    let pending = endorser
        .manager()
        .list(&TagFilter::new().with("state", "request"))
        .await
        .unwrap();
    assert_eq!(pending.len(), 8);
}

#[tokio::test]
async fn request_message_shape_on_the_wire() {
    let (author, _endorser) = pair();
    let (record, out) = author
        .manager()
        .create_request(NewRequest::new(
            AUTHOR_SIDE,
            TransactionType::Schema,
            schema_operation(),
        ))
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&out.message.to_json().unwrap()).unwrap();

    assert_eq!(value["@type"], json!("https://didcomm.org/transactions/1.0/request"));
    assert_eq!(value["@id"], json!(record.thread_id()));
    assert_eq!(value["~thread"]["thid"], json!(record.thread_id()));
    assert_eq!(value["transaction_type"], json!("SCHEMA"));
    let attach = &value["messages_attach"][0];
    assert_eq!(attach["mime_type"], json!("application/json"));
    assert_eq!(attach["data"]["json"]["tx_my_role"], json!(["TRANSACTION_AUTHOR"]));
    assert_eq!(
        attach["data"]["json"]["operation"]["data"]["name"],
        json!("university-degree")
    );
    assert!(matches!(out.message, ProtocolMessage::Request(_)));
}
