//! # Attached-Message Envelope
//!
//! The author's ledger operation travels inside an envelope that tells the
//! endorser what it is looking at and which roles each side plays. The
//! operation itself is opaque here: it is stored, echoed and signed, never
//! interpreted. Decoding and re-encoding `data` reproduces it key for key,
//! so a signature over a received envelope verifies against the sender's.
//!
//! ```json
//! {
//!   "mime_type": "application/json",
//!   "lastmod_time": "2026-10-19T08:00:00+00:00",
//!   "description": "The roles related to endorsement protocol",
//!   "data": {
//!     "json": {
//!       "tx_my_role": ["TRANSACTION_AUTHOR"],
//!       "tx_their_role": ["TRANSACTION_ENDORSER"],
//!       "operation": { "...": "..." }
//!     }
//!   }
//! }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config;
use crate::transaction::TransactionRole;

/// The envelope around an attached ledger payload.
///
/// All four fields are required when decoding. `lastmod_time` is kept as the
/// string that was received so re-encoding reproduces it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedMessage {
    /// Always `application/json` for envelopes we construct.
    pub mime_type: String,
    /// RFC 3339 timestamp of the last payload change.
    pub lastmod_time: String,
    pub description: String,
    pub data: AttachData,
}

/// Container for the payload. The payload sits under `json`; any sibling
/// members are carried along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachData {
    pub json: AttachJson,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Role declarations plus whatever else the author put in the payload.
///
/// Absent role arrays stay absent on re-encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_my_role: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_their_role: Option<Vec<String>>,
    /// The remaining keys, untouched.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl AttachedMessage {
    /// Wrap `payload` in a fresh envelope stamped now, with no roles declared.
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            mime_type: config::ATTACHMENT_MIME_TYPE.to_string(),
            lastmod_time: Utc::now().to_rfc3339(),
            description: config::ATTACHMENT_DESCRIPTION.to_string(),
            data: AttachData {
                json: AttachJson {
                    tx_my_role: None,
                    tx_their_role: None,
                    payload,
                },
                extra: Map::new(),
            },
        }
    }

    /// Declare the sender's role and the counterpart's.
    pub fn with_roles(mut self, mine: TransactionRole) -> Self {
        self.data.json.tx_my_role = Some(vec![mine.as_str().to_string()]);
        self.data.json.tx_their_role = Some(vec![mine.counterpart().as_str().to_string()]);
        self
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.data.json.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -- Helpers --

    fn schema_payload() -> Map<String, Value> {
        match json!({"operation": {"type": "101", "data": {"name": "degree", "version": "1.0"}}}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    // -- Tests --

    #[test]
    fn decode_reencode_is_lossless() {
        let envelope = AttachedMessage::new(schema_payload()).with_roles(TransactionRole::Author);
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let back: AttachedMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn new_envelope_uses_json_defaults() {
        let envelope = AttachedMessage::new(Map::new());
        assert_eq!(envelope.mime_type, "application/json");
        assert_eq!(envelope.description, config::ATTACHMENT_DESCRIPTION);
        assert!(chrono::DateTime::parse_from_rfc3339(&envelope.lastmod_time).is_ok());
    }

    #[test]
    fn roles_are_declared_from_sender_view() {
        let envelope = AttachedMessage::new(Map::new()).with_roles(TransactionRole::Endorser);
        assert_eq!(
            envelope.data.json.tx_my_role,
            Some(vec!["TRANSACTION_ENDORSER".to_string()])
        );
        assert_eq!(
            envelope.data.json.tx_their_role,
            Some(vec!["TRANSACTION_AUTHOR".to_string()])
        );
    }

    #[test]
    fn missing_mime_type_fails() {
        let raw = json!({
            "lastmod_time": "2026-10-19T08:00:00+00:00",
            "description": "d",
            "data": {"json": {}}
        });
        assert!(serde_json::from_value::<AttachedMessage>(raw).is_err());
    }

    #[test]
    fn missing_json_key_fails() {
        let raw = json!({
            "mime_type": "application/json",
            "lastmod_time": "2026-10-19T08:00:00+00:00",
            "description": "d",
            "data": {}
        });
        assert!(serde_json::from_value::<AttachedMessage>(raw).is_err());
    }

    #[test]
    fn unknown_envelope_fields_are_ignored() {
        let raw = json!({
            "mime_type": "application/json",
            "lastmod_time": "2026-10-19T08:00:00+00:00",
            "description": "d",
            "data": {"json": {"tx_my_role": ["TRANSACTION_AUTHOR"], "op": 1}},
            "filename": "ignored.json"
        });
        let envelope: AttachedMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.payload()["op"], json!(1));
        assert!(envelope.data.json.tx_their_role.is_none());
    }

    #[test]
    fn foreign_data_reencodes_unchanged() {
        let raw = json!({
            "mime_type": "application/json",
            "lastmod_time": "2026-10-19T08:00:00+00:00",
            "description": "d",
            "data": {"json": {"op": 1}, "sha256": "abc"}
        });
        let envelope: AttachedMessage = serde_json::from_value(raw.clone()).unwrap();
        let back = serde_json::to_value(&envelope).unwrap();
        assert_eq!(back["data"], raw["data"]);
        assert_eq!(envelope.data.extra["sha256"], json!("abc"));
    }

    #[test]
    fn payload_keys_survive_verbatim() {
        let envelope = AttachedMessage::new(schema_payload());
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value["data"]["json"]["operation"]["data"]["name"],
            json!("degree")
        );
    }
}
