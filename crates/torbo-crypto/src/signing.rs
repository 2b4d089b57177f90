//! Canonical signing strings and detached-signature verification.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use torbo_protocol::{NodeId, TaskId};

use crate::error::{CryptoError, CryptoResult};

/// The string a node signs when submitting a task to a peer.
pub fn submit_signing_string(task_id: &TaskId, title: &str, node_id: &NodeId) -> String {
    format!("{task_id}|{title}|{node_id}")
}

/// The string an executor signs when delivering a result.
pub fn result_signing_string(task_id: &TaskId, status: &str, node_id: &NodeId) -> String {
    format!("{task_id}|{status}|{node_id}")
}

/// Verify a base64 detached signature over `message` with a raw public key.
pub fn verify_detached(
    public_key: &[u8; 32],
    message: &str,
    signature_b64: &str,
) -> CryptoResult<()> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    let sig_bytes = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    let sig_array: [u8; 64] =
        sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::MalformedSignature(format!(
                "expected 64 bytes, got {}",
                sig_bytes.len()
            )))?;
    let signature = Signature::from_bytes(&sig_array);
    key.verify(message.as_bytes(), &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Looks up a peer node's public signing key.
///
/// The production resolver queries the peer's identity endpoint; tests use
/// a static map. `Ok(None)` means the peer could not produce a key, which
/// callers treat as a verification failure.
#[async_trait::async_trait]
pub trait PeerKeyResolver: Send + Sync {
    async fn public_key(&self, host: &str, port: u16) -> CryptoResult<Option<[u8; 32]>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeKeyPair;

    #[test]
    fn canonical_strings_use_pipe_separators() {
        let task = TaskId::from_string("t-1");
        let node = NodeId::from_string("node-a");
        assert_eq!(submit_signing_string(&task, "fetch mail", &node), "t-1|fetch mail|node-a");
        assert_eq!(result_signing_string(&task, "completed", &node), "t-1|completed|node-a");
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let pair = NodeKeyPair::generate();
        let message = submit_signing_string(
            &TaskId::from_string("t-1"),
            "fetch mail",
            &NodeId::from_string("node-a"),
        );
        let sig = pair.sign(message.as_bytes());
        verify_detached(&pair.public_key_bytes(), &message, &sig).unwrap();
    }

    #[test]
    fn signing_is_deterministic() {
        let pair = NodeKeyPair::generate();
        assert_eq!(pair.sign(b"same message"), pair.sign(b"same message"));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let pair = NodeKeyPair::generate();
        let sig = pair.sign(b"original");
        let err = verify_detached(&pair.public_key_bytes(), "tampered", &sig).unwrap_err();
        assert!(matches!(err, CryptoError::VerificationFailed));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let signer = NodeKeyPair::generate();
        let other = NodeKeyPair::generate();
        let sig = signer.sign(b"message");
        let err = verify_detached(&other.public_key_bytes(), "message", &sig).unwrap_err();
        assert!(matches!(err, CryptoError::VerificationFailed));
    }

    #[test]
    fn garbage_signature_is_malformed_not_failed() {
        let pair = NodeKeyPair::generate();
        let err = verify_detached(&pair.public_key_bytes(), "message", "@@@").unwrap_err();
        assert!(matches!(err, CryptoError::MalformedSignature(_)));
    }
}
