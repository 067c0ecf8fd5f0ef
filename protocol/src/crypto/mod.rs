//! # Cryptographic Primitives
//!
//! Thin wrappers over audited implementations: Ed25519 (`ed25519-dalek`)
//! for endorsement signatures and BLAKE3 for payload digests.

pub mod hash;
pub mod keys;

pub use hash::{canonical_json, payload_digest};
pub use keys::{AgentKeypair, DetachedSignature, KeyError, Verkey};
