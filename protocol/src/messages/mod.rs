//! # Protocol Messages
//!
//! The five messages two agents exchange while endorsing a transaction:
//!
//! ```text
//!   ┌──────────┐                                ┌──────────┐
//!   │  Author  │                                │ Endorser │
//!   └────┬─────┘                                └────┬─────┘
//!        │  TransactionRequest / resend              │
//!        ├──────────────────────────────────────────►│
//!        │  CancelTransaction                        │
//!        ├──────────────────────────────────────────►│
//!        │  EndorsedTransactionResponse / Refused…   │
//!        │◄──────────────────────────────────────────┤
//! ```
//!
//! Messages are JSON objects discriminated by `@type`. Each carries its own
//! `@id` and a `~thread` decorator whose `thid` is the `@id` of the request
//! that opened the exchange. Unknown fields are ignored on decode; missing
//! required fields are an error.

mod attach;
mod cancel;
mod request;
mod response;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;

pub use attach::{AttachData, AttachJson, AttachedMessage};
pub use cancel::CancelTransaction;
pub use request::{ResendTransactionRequest, TransactionRequest};
pub use response::{EndorsedTransactionResponse, RefusedTransactionResponse};

/// Decoding failures of inbound messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed protocol message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Thread decorator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub thid: String,
}

impl Thread {
    pub fn new(thid: impl Into<String>) -> Self {
        Self { thid: thid.into() }
    }
}

/// Any message of the protocol, tagged by `@type`.
///
/// The rename literals must match the URIs in [`crate::config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum ProtocolMessage {
    #[serde(rename = "https://didcomm.org/transactions/1.0/request")]
    Request(TransactionRequest),

    #[serde(rename = "https://didcomm.org/transactions/1.0/endorse")]
    Endorsed(EndorsedTransactionResponse),

    #[serde(rename = "https://didcomm.org/transactions/1.0/refuse")]
    Refused(RefusedTransactionResponse),

    #[serde(rename = "https://didcomm.org/transactions/1.0/cancel")]
    Cancel(CancelTransaction),

    #[serde(rename = "https://didcomm.org/transactions/1.0/resend")]
    Resend(ResendTransactionRequest),
}

impl ProtocolMessage {
    /// The `@type` URI.
    pub fn message_type(&self) -> &'static str {
        match self {
            ProtocolMessage::Request(_) => config::TRANSACTION_REQUEST,
            ProtocolMessage::Endorsed(_) => config::ENDORSED_TRANSACTION_RESPONSE,
            ProtocolMessage::Refused(_) => config::REFUSED_TRANSACTION_RESPONSE,
            ProtocolMessage::Cancel(_) => config::CANCEL_TRANSACTION,
            ProtocolMessage::Resend(_) => config::TRANSACTION_RESEND,
        }
    }

    /// Last path segment of `@type`, for logs and metric labels.
    pub fn short_name(&self) -> &'static str {
        let ty = self.message_type();
        ty.rsplit('/').next().unwrap_or(ty)
    }

    pub fn id(&self) -> &str {
        match self {
            ProtocolMessage::Request(m) | ProtocolMessage::Resend(m) => &m.id,
            ProtocolMessage::Endorsed(m) => &m.id,
            ProtocolMessage::Refused(m) => &m.id,
            ProtocolMessage::Cancel(m) => &m.id,
        }
    }

    pub fn thread_id(&self) -> &str {
        match self {
            ProtocolMessage::Request(m) | ProtocolMessage::Resend(m) => &m.thread.thid,
            ProtocolMessage::Endorsed(m) => &m.thread.thid,
            ProtocolMessage::Refused(m) => &m.thread.thid,
            ProtocolMessage::Cancel(m) => &m.thread.thid,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{
        Operation, SignatureRequest, Timing, TransactionRecord, TransactionRole, TransactionType,
    };
    use serde_json::{json, Map};

    // -- Helpers --

    fn requested_record() -> TransactionRecord {
        let mut rec = TransactionRecord::new(
            TransactionRole::Author,
            "conn-a",
            "thread-a",
            TransactionType::CredentialDefinition,
        );
        rec.signature_request = vec![SignatureRequest::default()];
        rec.timing = Timing::default();
        let mut payload = Map::new();
        payload.insert("operation".into(), json!({"type": "102"}));
        rec.messages_attach = vec![AttachedMessage::new(payload).with_roles(TransactionRole::Author)];
        rec.apply(Operation::CreateRequest).unwrap();
        rec
    }

    // -- Tests --

    #[test]
    fn type_literals_match_config() {
        let rec = requested_record();
        let messages = [
            ProtocolMessage::Request(TransactionRequest::from_record(&rec)),
            ProtocolMessage::Resend(TransactionRequest::resend(&rec)),
            ProtocolMessage::Cancel(CancelTransaction::from_record(&rec)),
            ProtocolMessage::Endorsed(EndorsedTransactionResponse::from_record(&rec)),
            ProtocolMessage::Refused(RefusedTransactionResponse::from_record(&rec)),
        ];
        for msg in messages {
            let value = serde_json::to_value(&msg).unwrap();
            assert_eq!(value["@type"], json!(msg.message_type()));
        }
    }

    #[test]
    fn request_id_is_thread_id() {
        let rec = requested_record();
        let msg = ProtocolMessage::Request(TransactionRequest::from_record(&rec));
        assert_eq!(msg.id(), "thread-a");
        assert_eq!(msg.thread_id(), "thread-a");

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["~thread"]["thid"], json!("thread-a"));
        assert_eq!(value["transaction_type"], json!("CREDENTIAL_DEFINITION"));
    }

    #[test]
    fn resend_keeps_thread_and_attachments() {
        let rec = requested_record();
        let resend = TransactionRequest::resend(&rec);
        assert_ne!(resend.id, rec.thread_id());
        assert_eq!(resend.thread.thid, rec.thread_id());
        assert_eq!(resend.messages_attach, rec.messages_attach);
    }

    #[test]
    fn decode_roundtrip_through_bytes() {
        let rec = requested_record();
        let msg = ProtocolMessage::Request(TransactionRequest::from_record(&rec));
        let decoded = ProtocolMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unknown_type_is_malformed() {
        let raw = br#"{"@type": "https://didcomm.org/transactions/1.0/nope", "@id": "x"}"#;
        assert!(matches!(
            ProtocolMessage::from_json(raw),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn missing_thread_is_malformed() {
        let raw = json!({
            "@type": config::CANCEL_TRANSACTION,
            "@id": "m1",
            "transaction_id": "t1"
        });
        assert!(ProtocolMessage::from_json(&serde_json::to_vec(&raw).unwrap()).is_err());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let raw = json!({
            "@type": config::CANCEL_TRANSACTION,
            "@id": "m1",
            "~thread": {"thid": "t", "pthid": "parent"},
            "transaction_id": "t1",
            "~timing": {"out_time": "now"}
        });
        let msg = ProtocolMessage::from_json(&serde_json::to_vec(&raw).unwrap()).unwrap();
        assert_eq!(msg.short_name(), "cancel");
        assert_eq!(msg.thread_id(), "t");
    }

    #[test]
    fn refusal_reason_is_optional_on_the_wire() {
        let raw = json!({
            "@type": config::REFUSED_TRANSACTION_RESPONSE,
            "@id": "m2",
            "~thread": {"thid": "t"},
            "transaction_id": "t1",
            "endorser_transaction_id": "e1"
        });
        let msg: ProtocolMessage = serde_json::from_value(raw).unwrap();
        match msg {
            ProtocolMessage::Refused(r) => assert!(r.reason.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
