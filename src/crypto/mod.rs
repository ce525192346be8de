//! Key unwrapping and payload decryption.
//!
//! Content keys never outlive the job they were unwrapped for: `ContentKey`
//! wipes its bytes on drop, and nothing in this module caches one.

pub mod payload;
pub mod service;
pub mod unwrap;

use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use payload::{PayloadDecryptor, PayloadFormat, seal_payload, sniff_payload, sniff_prefix};
pub use service::{HttpUnwrapService, UnwrapService};
pub use unwrap::{DeviceKeys, KeyPackage, KeyUnwrapper, wrap_for_device, wrap_legacy};

/// AES block size, also the IV length for CBC.
pub const BLOCK_LEN: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key package format: {0}")]
    InvalidPackageFormat(String),
    #[error("Content key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("Payload decryption failed: {0}")]
    DecryptFailed(String),
}

/// Symmetric key for exactly one job's payload.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    bytes: Vec<u8>,
}

impl ContentKey {
    /// Takes ownership of raw key bytes. Only 16- and 32-byte keys are valid;
    /// rejected input is wiped before the error is returned.
    pub fn from_vec(mut bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if !matches!(bytes.len(), 16 | 32) {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::KeyUnavailable(format!(
                "content key must be 16 or 32 bytes, got {}",
                len
            )));
        }
        Ok(Self { bytes })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        Self::from_vec(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({} bytes, redacted)", self.bytes.len())
    }
}
