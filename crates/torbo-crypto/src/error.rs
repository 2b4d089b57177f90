//! Crypto error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("malformed key encoding: {0}")]
    MalformedKey(String),
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("key io error: {0}")]
    Io(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
