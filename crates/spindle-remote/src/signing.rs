//! Request signing.
//!
//! The signed message is the SHA-1 digest of the payload's canonical JSON
//! (object keys sorted, no whitespace). The digest is signed with Ed25519
//! and hex-encoded.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignError {
    #[error("Invalid hex key: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(ed25519_dalek::SignatureError),
    #[error("Problem verifying message signature")]
    SelfCheckFailed,
}

/// Produces the signature placed in a request envelope.
pub trait RequestSigner: Send + Sync {
    /// Client id sent as `fromClientId`.
    fn client_id(&self) -> &str;

    fn sign(&self, payload: &Value) -> Result<String, SignError>;
}

/// Serialize `value` with object keys sorted at every level.
///
/// Integral floats are written without a fractional part so the output
/// matches what a JavaScript peer produces for the same payload.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                out.push_str(&(f as i64).to_string());
            }
            _ => out.push_str(&n.to_string()),
        },
        other => out.push_str(&other.to_string()),
    }
}

fn message_digest(payload: &Value) -> [u8; 20] {
    let digest = Sha1::digest(canonical_json(payload).as_bytes());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

fn decode_key(hex_key: &str) -> Result<[u8; 32], SignError> {
    let bytes = hex::decode(hex_key.trim())?;
    // A 64-byte secret is seed followed by public key
    if bytes.len() != 32 && bytes.len() != 64 {
        return Err(SignError::KeyLength {
            expected: 32,
            actual: bytes.len(),
        });
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[..32]);
    Ok(key)
}

/// Check `signature` (hex) over `payload` against a hex public key.
pub fn verify_signature(payload: &Value, public_key_hex: &str, signature: &str) -> bool {
    let Ok(key) = decode_key(public_key_hex) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    verifying_key.verify(&message_digest(payload), &sig).is_ok()
}

/// Signs with the node's Ed25519 key; the client id is the hex public key.
pub struct Ed25519Signer {
    public_key_hex: String,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Ed25519Signer {
    pub fn from_hex(public_key_hex: &str, private_key_hex: &str) -> Result<Self, SignError> {
        let signing_key = SigningKey::from_bytes(&decode_key(private_key_hex)?);
        let verifying_key =
            VerifyingKey::from_bytes(&decode_key(public_key_hex)?).map_err(SignError::InvalidPublicKey)?;
        Ok(Self {
            public_key_hex: public_key_hex.trim().to_string(),
            signing_key,
            verifying_key,
        })
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key_hex", &self.public_key_hex)
            .finish_non_exhaustive()
    }
}

impl RequestSigner for Ed25519Signer {
    fn client_id(&self) -> &str {
        &self.public_key_hex
    }

    fn sign(&self, payload: &Value) -> Result<String, SignError> {
        let digest = message_digest(payload);
        let signature = self.signing_key.sign(&digest);
        // Catches a private key that does not belong to the declared id
        if self.verifying_key.verify(&digest, &signature).is_err() {
            return Err(SignError::SelfCheckFailed);
        }
        Ok(hex::encode(signature.to_bytes()))
    }
}
