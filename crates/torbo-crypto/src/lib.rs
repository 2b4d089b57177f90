//! # torbo-crypto — node identity and message authentication
//!
//! Every gateway node owns an Ed25519 key pair. Delegation submissions and
//! results are authenticated with detached signatures over short canonical
//! strings; the delegation engine only ever sees opaque base64 signatures,
//! never raw key material.

pub mod error;
pub mod identity;
pub mod signing;

pub use error::{CryptoError, CryptoResult};
pub use identity::{NodeIdentity, NodeKeyPair, decode_public_key};
pub use signing::{PeerKeyResolver, result_signing_string, submit_signing_string, verify_detached};
