//! # Agent Keys
//!
//! Ed25519 keypair of the local agent. The endorser signs the digest of the
//! attached payload with it; the author verifies the signature against the
//! verkey carried in the `signature_response`.
//!
//! Key bytes are never logged. `Debug` prints the verkey only.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: expected 32 hex-encoded bytes")]
    InvalidSecretKey,

    #[error("invalid verkey: not a valid Ed25519 point")]
    InvalidVerkey,

    #[error("invalid signature encoding: expected 64 hex-encoded bytes")]
    InvalidSignature,
}

/// The signing identity of this agent.
///
/// Intentionally not `Serialize`: exporting the secret goes through
/// [`secret_key_hex`](Self::secret_key_hex) and nowhere else.
pub struct AgentKeypair {
    signing_key: SigningKey,
}

/// Hex-encoded Ed25519 public key, as it travels in `signature_response`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Verkey(String);

/// A detached Ed25519 signature, hex-encoded on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetachedSignature(String);

impl AgentKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Test fixtures use this.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair from the hex secret stored in the agent key file.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Hex of the raw secret. Handle with care.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// The public half, hex-encoded.
    pub fn verkey(&self) -> Verkey {
        Verkey(hex::encode(self.signing_key.verifying_key().to_bytes()))
    }

    /// Sign `message` and return the detached signature.
    pub fn sign(&self, message: &[u8]) -> DetachedSignature {
        DetachedSignature(hex::encode(self.signing_key.sign(message).to_bytes()))
    }
}

impl Clone for AgentKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for AgentKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentKeypair(verkey={})", self.verkey())
    }
}

impl Verkey {
    /// Wrap an already hex-encoded verkey after checking it decodes to a
    /// valid curve point.
    pub fn parse(hex_str: &str) -> Result<Self, KeyError> {
        let key = Self(hex_str.to_string());
        key.to_verifying_key()?;
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_verifying_key(&self) -> Result<VerifyingKey, KeyError> {
        let bytes = hex::decode(&self.0).map_err(|_| KeyError::InvalidVerkey)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidVerkey)?;
        VerifyingKey::from_bytes(&arr).map_err(|_| KeyError::InvalidVerkey)
    }

    /// Verify `signature` over `message`.
    ///
    /// Malformed keys and signatures are errors; a well-formed signature
    /// that does not match is `Ok(false)`.
    pub fn verify(&self, message: &[u8], signature: &DetachedSignature) -> Result<bool, KeyError> {
        let key = self.to_verifying_key()?;
        let sig = signature.to_dalek()?;
        Ok(key.verify(message, &sig).is_ok())
    }
}

impl fmt::Display for Verkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Verkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Verkey({})", self.0)
    }
}

impl DetachedSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_dalek(&self) -> Result<DalekSignature, KeyError> {
        let bytes = hex::decode(&self.0).map_err(|_| KeyError::InvalidSignature)?;
        let arr: [u8; 64] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSignature)?;
        Ok(DalekSignature::from_bytes(&arr))
    }
}

impl fmt::Debug for DetachedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(16).collect();
        write!(f, "DetachedSignature({prefix}..)")
    }
}
