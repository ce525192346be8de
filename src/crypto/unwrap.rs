// src/crypto/unwrap.rs - Content key unwrapping (ephemeral X25519 and legacy CBC)
use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

use super::payload::{cbc_decrypt_in_place, cbc_encrypt};
use super::service::UnwrapService;
use super::{BLOCK_LEN, ContentKey, CryptoError};

pub const X25519_KEY_LEN: usize = 32;
pub const GCM_NONCE_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const KEK_INFO: &[u8] = b"sealed-print/content-key/v1";

/// A parsed key package.
///
/// Ephemeral packages are `base64(pubkey):base64(nonce):base64(ciphertext)`.
/// Legacy packages are hex of a 16-byte IV followed by CBC ciphertext.
#[derive(Debug, Clone)]
pub enum KeyPackage {
    Ephemeral {
        ephemeral_public: PublicKey,
        nonce: [u8; GCM_NONCE_LEN],
        ciphertext: Vec<u8>,
    },
    Legacy {
        iv: [u8; BLOCK_LEN],
        ciphertext: Vec<u8>,
    },
}

impl KeyPackage {
    pub fn parse(raw: &str) -> Result<Self, CryptoError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CryptoError::InvalidPackageFormat("key package is empty".to_string()));
        }
        if raw.contains(':') {
            Self::parse_ephemeral(raw)
        } else if raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Self::parse_legacy(raw)
        } else {
            Err(CryptoError::InvalidPackageFormat(
                "key package is neither ephemeral nor legacy".to_string(),
            ))
        }
    }

    fn parse_ephemeral(raw: &str) -> Result<Self, CryptoError> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 3 {
            return Err(CryptoError::InvalidPackageFormat(format!(
                "expected 3 ':'-separated parts, found {}",
                parts.len()
            )));
        }
        let decode = |part: &str, what: &str| {
            STANDARD
                .decode(part)
                .map_err(|e| CryptoError::InvalidPackageFormat(format!("{}: {}", what, e)))
        };
        let public_bytes = decode(parts[0], "ephemeral public key")?;
        let nonce_bytes = decode(parts[1], "nonce")?;
        let ciphertext = decode(parts[2], "wrapped key")?;

        let public: [u8; X25519_KEY_LEN] = public_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidPackageFormat(format!(
                "ephemeral public key must be {} bytes, got {}",
                X25519_KEY_LEN,
                public_bytes.len()
            ))
        })?;
        let nonce: [u8; GCM_NONCE_LEN] = nonce_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidPackageFormat(format!(
                "nonce must be {} bytes, got {}",
                GCM_NONCE_LEN,
                nonce_bytes.len()
            ))
        })?;
        if ciphertext.len() <= GCM_TAG_LEN {
            return Err(CryptoError::InvalidPackageFormat(
                "wrapped key is shorter than its authentication tag".to_string(),
            ));
        }
        Ok(KeyPackage::Ephemeral {
            ephemeral_public: PublicKey::from(public),
            nonce,
            ciphertext,
        })
    }

    fn parse_legacy(raw: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(raw)
            .map_err(|e| CryptoError::InvalidPackageFormat(format!("legacy package: {}", e)))?;
        if bytes.len() < 2 * BLOCK_LEN || (bytes.len() - BLOCK_LEN) % BLOCK_LEN != 0 {
            return Err(CryptoError::InvalidPackageFormat(format!(
                "legacy package must be an IV plus whole cipher blocks, got {} bytes",
                bytes.len()
            )));
        }
        let mut iv = [0u8; BLOCK_LEN];
        iv.copy_from_slice(&bytes[..BLOCK_LEN]);
        Ok(KeyPackage::Legacy {
            iv,
            ciphertext: bytes[BLOCK_LEN..].to_vec(),
        })
    }
}

/// The device's long-term key-exchange key pair.
pub struct DeviceKeys {
    secret: StaticSecret,
    public: PublicKey,
}

impl DeviceKeys {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random())
    }

    pub fn from_secret_bytes(bytes: [u8; X25519_KEY_LEN]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            hex::decode(secret_hex.trim())
                .map_err(|e| CryptoError::KeyUnavailable(format!("device key: {}", e)))?,
        );
        let secret: [u8; X25519_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::KeyUnavailable(format!("device key must be {} bytes", X25519_KEY_LEN))
        })?;
        Ok(Self::from_secret_bytes(secret))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }
}

impl fmt::Debug for DeviceKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKeys")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

fn derive_kek(
    shared: &SharedSecret,
    ephemeral_public: &PublicKey,
    device_public: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut salt = [0u8; 2 * X25519_KEY_LEN];
    salt[..X25519_KEY_LEN].copy_from_slice(ephemeral_public.as_bytes());
    salt[X25519_KEY_LEN..].copy_from_slice(device_public.as_bytes());
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut kek = Zeroizing::new([0u8; 32]);
    hk.expand(KEK_INFO, &mut kek[..])
        .map_err(|_| CryptoError::KeyUnavailable("key derivation failed".to_string()))?;
    Ok(kek)
}

/// Recovers a job's content key from its key package.
///
/// Ephemeral packages need the device key pair; legacy packages need a key
/// reference and an [`UnwrapService`]. Either dependency may be absent, in
/// which case packages of that kind fail with `KeyUnavailable`.
#[derive(Default)]
pub struct KeyUnwrapper {
    device_keys: Option<DeviceKeys>,
    service: Option<Arc<dyn UnwrapService>>,
}

impl KeyUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_keys(mut self, keys: DeviceKeys) -> Self {
        self.device_keys = Some(keys);
        self
    }

    pub fn with_service(mut self, service: Arc<dyn UnwrapService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn device_public_key(&self) -> Option<PublicKey> {
        self.device_keys.as_ref().map(DeviceKeys::public_key)
    }

    pub async fn unwrap(
        &self,
        key_package: &str,
        kek_reference: Option<&str>,
    ) -> Result<ContentKey, CryptoError> {
        match KeyPackage::parse(key_package)? {
            KeyPackage::Ephemeral {
                ephemeral_public,
                nonce,
                ciphertext,
            } => self.unwrap_ephemeral(&ephemeral_public, &nonce, &ciphertext),
            KeyPackage::Legacy { iv, ciphertext } => {
                self.unwrap_legacy(&iv, ciphertext, kek_reference).await
            }
        }
    }

    fn unwrap_ephemeral(
        &self,
        ephemeral_public: &PublicKey,
        nonce: &[u8; GCM_NONCE_LEN],
        ciphertext: &[u8],
    ) -> Result<ContentKey, CryptoError> {
        let keys = self.device_keys.as_ref().ok_or_else(|| {
            CryptoError::KeyUnavailable("no device key-exchange key configured".to_string())
        })?;
        let shared = keys.secret.diffie_hellman(ephemeral_public);
        if !shared.was_contributory() {
            return Err(CryptoError::KeyUnavailable(
                "ephemeral public key is low-order".to_string(),
            ));
        }
        let kek = derive_kek(&shared, ephemeral_public, &keys.public)?;
        let cipher = Aes256Gcm::new_from_slice(&kek[..])
            .map_err(|_| CryptoError::KeyUnavailable("invalid key-encryption key".to_string()))?;
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::KeyUnavailable("wrapped key failed authentication".to_string()))?;
        ContentKey::from_vec(plain)
    }

    async fn unwrap_legacy(
        &self,
        iv: &[u8; BLOCK_LEN],
        ciphertext: Vec<u8>,
        kek_reference: Option<&str>,
    ) -> Result<ContentKey, CryptoError> {
        let reference = kek_reference.ok_or_else(|| {
            CryptoError::KeyUnavailable("legacy key package without a key reference".to_string())
        })?;
        let service = self.service.as_ref().ok_or_else(|| {
            CryptoError::KeyUnavailable("no unwrap service configured".to_string())
        })?;
        let wrapping_key = service.fetch_wrapping_key(reference).await?;

        let mut buf = Zeroizing::new(ciphertext);
        cbc_decrypt_in_place(&wrapping_key, iv, &mut buf)
            .map_err(|reason| CryptoError::KeyUnavailable(format!("legacy unwrap: {}", reason)))?;
        ContentKey::from_slice(&buf)
    }
}

/// Wraps `content_key` for the device owning `device_public`, producing an
/// ephemeral key package.
pub fn wrap_for_device(
    device_public: &PublicKey,
    content_key: &ContentKey,
) -> Result<String, CryptoError> {
    let ephemeral = EphemeralSecret::random();
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(device_public);
    let kek = derive_kek(&shared, &ephemeral_public, device_public)?;
    let cipher = Aes256Gcm::new_from_slice(&kek[..])
        .map_err(|_| CryptoError::KeyUnavailable("invalid key-encryption key".to_string()))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let wrapped = cipher
        .encrypt(&nonce, content_key.as_bytes())
        .map_err(|_| CryptoError::KeyUnavailable("failed to wrap content key".to_string()))?;
    Ok(format!(
        "{}:{}:{}",
        STANDARD.encode(ephemeral_public.as_bytes()),
        STANDARD.encode(nonce),
        STANDARD.encode(wrapped)
    ))
}

/// Builds a legacy key package: hex(iv || CBC(wrapping_key, content_key)).
pub fn wrap_legacy(
    wrapping_key: &[u8],
    content_key: &ContentKey,
    iv: &[u8; BLOCK_LEN],
) -> Result<String, CryptoError> {
    let sealed = cbc_encrypt(wrapping_key, iv, content_key.as_bytes())
        .map_err(|reason| CryptoError::KeyUnavailable(reason.to_string()))?;
    let mut package = Vec::with_capacity(BLOCK_LEN + sealed.len());
    package.extend_from_slice(iv);
    package.extend_from_slice(&sealed);
    Ok(hex::encode(package))
}
