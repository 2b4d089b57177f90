//! Node key pairs and the node identity triple.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use torbo_protocol::NodeId;

use crate::error::{CryptoError, CryptoResult};

/// An Ed25519 key pair backing one gateway node.
pub struct NodeKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl NodeKeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Reconstruct from a 32-byte secret key.
    pub fn from_secret_key(bytes: &[u8]) -> CryptoResult<Self> {
        let secret: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let signing_key = SigningKey::from_bytes(&secret);
        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Load the secret key from `path`, or generate one and write it there.
    ///
    /// Creates parent directories as needed. On Unix the file is created
    /// with mode 0o600.
    pub fn load_or_generate(path: impl AsRef<Path>) -> CryptoResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CryptoError::Io(e.to_string()))?;
        }
        if path.exists() {
            let bytes = std::fs::read(path).map_err(|e| CryptoError::Io(e.to_string()))?;
            return Self::from_secret_key(&bytes);
        }

        let pair = Self::generate();
        #[cfg(unix)]
        {
            use std::io::Write as _;
            use std::os::unix::fs::OpenOptionsExt as _;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)
                .map_err(|e| CryptoError::Io(e.to_string()))?;
            file.write_all(&pair.signing_key.to_bytes())
                .map_err(|e| CryptoError::Io(e.to_string()))?;
        }
        #[cfg(not(unix))]
        std::fs::write(path, pair.signing_key.to_bytes())
            .map_err(|e| CryptoError::Io(e.to_string()))?;
        Ok(pair)
    }

    /// Public key bytes (32 bytes).
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Public key as standard base64, the form served from the identity
    /// endpoint.
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.public_key_bytes())
    }

    /// Short hex fingerprint for logs (first 8 bytes of the public key).
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.public_key_bytes()[..8])
    }

    /// Sign a message, returning the detached signature as base64.
    pub fn sign(&self, message: &[u8]) -> String {
        BASE64.encode(self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for NodeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeyPair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Decode a peer public key published as base64 or lowercase hex.
pub fn decode_public_key(encoded: &str) -> CryptoResult<[u8; 32]> {
    let trimmed = encoded.trim();
    let bytes = if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(trimmed).map_err(|e| CryptoError::MalformedKey(e.to_string()))?
    } else {
        BASE64
            .decode(trimmed)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?
    };
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })
}

/// The (node id, display name, key pair) triple identifying this node.
#[derive(Debug)]
pub struct NodeIdentity {
    pub node_id: NodeId,
    pub display_name: String,
    pub keypair: NodeKeyPair,
}

impl NodeIdentity {
    pub fn new(
        node_id: impl Into<NodeId>,
        display_name: impl Into<String>,
        keypair: NodeKeyPair,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            display_name: display_name.into(),
            keypair,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_distinct() {
        let a = NodeKeyPair::generate();
        let b = NodeKeyPair::generate();
        assert_ne!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn secret_key_roundtrip_preserves_public_key() {
        let pair = NodeKeyPair::generate();
        let secret = pair.signing_key.to_bytes();
        let restored = NodeKeyPair::from_secret_key(&secret).unwrap();
        assert_eq!(pair.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn wrong_length_secret_is_rejected() {
        let err = NodeKeyPair::from_secret_key(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn load_or_generate_is_stable_across_loads() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!("torbo-key-{nanos}/node.key"));

        let first = NodeKeyPair::load_or_generate(&path).unwrap();
        let second = NodeKeyPair::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key_bytes(), second.public_key_bytes());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn public_key_decodes_from_base64_and_hex() {
        let pair = NodeKeyPair::generate();
        let from_b64 = decode_public_key(&pair.public_key_base64()).unwrap();
        assert_eq!(from_b64, pair.public_key_bytes());
        let from_hex = decode_public_key(&hex::encode(pair.public_key_bytes())).unwrap();
        assert_eq!(from_hex, pair.public_key_bytes());
        assert!(decode_public_key("!!!not-a-key!!!").is_err());
    }
}
