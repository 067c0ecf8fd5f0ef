//! Core value types carried by transaction records and protocol messages.
//!
//! The signature descriptors and timing window used to be open maps on the
//! wire. They have a known schema, so they are modelled as structs here;
//! only the attached application payload stays untyped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config;
use crate::crypto::{DetachedSignature, Verkey};

// ---------------------------------------------------------------------------
// Transaction Type
// ---------------------------------------------------------------------------

/// Kind of ledger write awaiting endorsement. Opaque to the state machine;
/// it is only stored, indexed and echoed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Schema,
    CredentialDefinition,
}

impl TransactionType {
    pub const ALL: [TransactionType; 2] =
        [TransactionType::Schema, TransactionType::CredentialDefinition];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Schema => "SCHEMA",
            TransactionType::CredentialDefinition => "CREDENTIAL_DEFINITION",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names neither a known transaction type nor role.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what}: {value}")]
pub struct ParseError {
    pub what: &'static str,
    pub value: String,
}

impl FromStr for TransactionType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError {
                what: "transaction type",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Which side of the exchange the local agent plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionRole {
    #[serde(rename = "TRANSACTION_AUTHOR")]
    Author,
    #[serde(rename = "TRANSACTION_ENDORSER")]
    Endorser,
}

impl TransactionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionRole::Author => "TRANSACTION_AUTHOR",
            TransactionRole::Endorser => "TRANSACTION_ENDORSER",
        }
    }

    /// The role the counterpart plays when we play `self`.
    pub fn counterpart(&self) -> TransactionRole {
        match self {
            TransactionRole::Author => TransactionRole::Endorser,
            TransactionRole::Endorser => TransactionRole::Author,
        }
    }
}

impl fmt::Display for TransactionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionRole {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSACTION_AUTHOR" | "author" => Ok(TransactionRole::Author),
            "TRANSACTION_ENDORSER" | "endorser" => Ok(TransactionRole::Endorser),
            other => Err(ParseError {
                what: "transaction role",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Who is asked to sign, and in what capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub context: String,
    pub method: String,
    pub signature_type: String,
    pub signer_goal_code: String,
    pub author_goal_code: String,
}

impl Default for SignatureRequest {
    fn default() -> Self {
        Self {
            context: config::SIGNATURE_CONTEXT.to_string(),
            method: config::SIGNATURE_METHOD.to_string(),
            signature_type: config::SIGNATURE_TYPE.to_string(),
            signer_goal_code: config::SIGNER_GOAL_CODE.to_string(),
            author_goal_code: config::AUTHOR_GOAL_CODE.to_string(),
        }
    }
}

/// A signature the endorser actually produced.
///
/// `signature` covers the BLAKE3 digest of the canonical JSON encoding of
/// the record's `messages_attach`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    /// Thread of the request being answered.
    pub message_id: String,
    pub context: String,
    pub method: String,
    pub signer_goal_code: String,
    pub signature_type: String,
    pub signer_verkey: Verkey,
    pub signature: DetachedSignature,
}

impl SignatureResponse {
    /// Response to `request`, signed by the holder of `signer_verkey`.
    pub fn answering(
        request: &SignatureRequest,
        message_id: impl Into<String>,
        signer_verkey: Verkey,
        signature: DetachedSignature,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            context: request.context.clone(),
            method: request.method.clone(),
            signer_goal_code: request.signer_goal_code.clone(),
            signature_type: request.signature_type.clone(),
            signer_verkey,
            signature,
        }
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// How long the endorser has to act. Advisory: nothing in this crate
/// expires a request, a scheduler elsewhere may.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_time: Option<DateTime<Utc>>,
}

impl Timing {
    pub fn expiring_at(expires_time: DateTime<Utc>) -> Self {
        Self {
            expires_time: Some(expires_time),
        }
    }
}

// ---------------------------------------------------------------------------
// Attachment Formats
// ---------------------------------------------------------------------------

/// Declares the format of one entry in `messages_attach`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachFormat {
    /// Index of the described attachment.
    pub attach_id: String,
    pub format: String,
}

impl AttachFormat {
    pub fn endorse_request(attach_id: usize) -> Self {
        Self {
            attach_id: attach_id.to_string(),
            format: "dif/endorse-transaction/request@v1.0".to_string(),
        }
    }
}
