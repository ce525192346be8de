// src/crypto/payload.rs - AES-CBC payload decryption and format sniffing
use aes::{Aes128, Aes256};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use zeroize::{Zeroize, Zeroizing};

use super::{BLOCK_LEN, ContentKey, CryptoError};
use crate::artifact::DecryptedArtifact;

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// Bytes inspected when deciding whether a payload is plaintext.
pub const SNIFF_WINDOW: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Encrypted,
    Plaintext,
    Malformed,
}

/// Classifies a job payload before any key material is requested.
///
/// A printable, UTF-8 head means the payload was never sealed. Otherwise a
/// non-empty, block-aligned payload is treated as ciphertext.
pub fn sniff_payload(bytes: &[u8]) -> PayloadFormat {
    sniff_prefix(&bytes[..bytes.len().min(SNIFF_WINDOW)], bytes.len() as u64)
}

/// [`sniff_payload`] for callers holding only the first bytes of a
/// `total_len` byte payload.
pub fn sniff_prefix(head: &[u8], total_len: u64) -> PayloadFormat {
    if head.is_empty() || total_len == 0 {
        return PayloadFormat::Malformed;
    }
    let truncated = (head.len() as u64) < total_len;
    if is_instruction_text(head, truncated) {
        PayloadFormat::Plaintext
    } else if total_len % BLOCK_LEN as u64 == 0 {
        PayloadFormat::Encrypted
    } else {
        PayloadFormat::Malformed
    }
}

/// True when `bytes` is UTF-8 with no control characters other than tab,
/// CR and LF. With `truncated`, a multi-byte character cut at the end is
/// tolerated.
pub(crate) fn is_instruction_text(bytes: &[u8], truncated: bool) -> bool {
    let utf8_ok = match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => truncated && e.error_len().is_none(),
    };
    utf8_ok
        && bytes
            .iter()
            .all(|&b| (b >= 0x20 && b != 0x7f) || matches!(b, b'\t' | b'\n' | b'\r'))
}

pub struct PayloadDecryptor;

impl PayloadDecryptor {
    /// Decrypts `payload` into a fresh in-memory artifact.
    ///
    /// The ciphertext is copied once into a zeroizing buffer and decrypted in
    /// place. Any failure wipes that buffer; no partial plaintext escapes.
    pub fn decrypt(
        payload: &[u8],
        key: &ContentKey,
        iv: &[u8; BLOCK_LEN],
    ) -> Result<DecryptedArtifact, CryptoError> {
        if payload.is_empty() || payload.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::DecryptFailed(format!(
                "payload length {} is not a non-zero multiple of {}",
                payload.len(),
                BLOCK_LEN
            )));
        }

        let mut buf = Zeroizing::new(Vec::with_capacity(payload.len()));
        buf.extend_from_slice(payload);
        cbc_decrypt_in_place(key.as_bytes(), iv, &mut buf)
            .map_err(|reason| CryptoError::DecryptFailed(reason.to_string()))?;

        // PKCS#7 alone accepts roughly one wrong key in 256.
        if !is_instruction_text(&buf, false) {
            return Err(CryptoError::DecryptFailed(
                "decrypted payload is not instruction text".to_string(),
            ));
        }

        tracing::debug!("Decrypted payload into {} byte artifact", buf.len());
        Ok(DecryptedArtifact::from_zeroizing(buf))
    }
}

/// Seals a plaintext payload for a content key. Used by producers and tests.
pub fn seal_payload(
    plaintext: &[u8],
    key: &ContentKey,
    iv: &[u8; BLOCK_LEN],
) -> Result<Vec<u8>, CryptoError> {
    cbc_encrypt(key.as_bytes(), iv, plaintext).map_err(|r| CryptoError::DecryptFailed(r.to_string()))
}

/// AES-CBC/PKCS#7 decrypt, truncating `buf` to the plaintext length.
/// The key length picks AES-128 or AES-256.
pub(crate) fn cbc_decrypt_in_place(
    key: &[u8],
    iv: &[u8; BLOCK_LEN],
    buf: &mut Vec<u8>,
) -> Result<(), &'static str> {
    if buf.is_empty() || buf.len() % BLOCK_LEN != 0 {
        return Err("ciphertext is not a whole number of blocks");
    }
    let result = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, &iv[..])
            .map_err(|_| "invalid key length")
            .and_then(|dec| {
                dec.decrypt_padded_mut::<Pkcs7>(buf.as_mut_slice())
                    .map(|plain| plain.len())
                    .map_err(|_| "padding check failed")
            }),
        32 => Aes256CbcDec::new_from_slices(key, &iv[..])
            .map_err(|_| "invalid key length")
            .and_then(|dec| {
                dec.decrypt_padded_mut::<Pkcs7>(buf.as_mut_slice())
                    .map(|plain| plain.len())
                    .map_err(|_| "padding check failed")
            }),
        _ => Err("unsupported key length"),
    };
    match result {
        Ok(plain_len) => {
            buf.truncate(plain_len);
            Ok(())
        }
        Err(reason) => {
            buf.zeroize();
            Err(reason)
        }
    }
}

pub(crate) fn cbc_encrypt(
    key: &[u8],
    iv: &[u8; BLOCK_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, &'static str> {
    match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, &iv[..])
            .map(|enc| enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
            .map_err(|_| "invalid key length"),
        32 => Aes256CbcEnc::new_from_slices(key, &iv[..])
            .map(|enc| enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
            .map_err(|_| "invalid key length"),
        _ => Err("unsupported key length"),
    }
}
