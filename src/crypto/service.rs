// src/crypto/service.rs - Remote release of legacy wrapping keys
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::CryptoError;
use crate::config::UnwrapServiceConfig;

/// Resolves a key reference to the key that wraps a legacy key package.
#[async_trait]
pub trait UnwrapService: Send + Sync {
    async fn fetch_wrapping_key(&self, reference: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

#[derive(Serialize)]
struct UnwrapRequest<'a> {
    encrypted_psek: &'a str,
}

#[derive(Deserialize)]
struct UnwrapResponse {
    decrypted_psek: Option<String>,
}

/// HTTP client for a key service that accepts
/// `POST {"encrypted_psek": <reference>}` and answers with a base64
/// `decrypted_psek`.
pub struct HttpUnwrapService {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpUnwrapService {
    pub fn from_config(config: &UnwrapServiceConfig) -> Result<Self, CryptoError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CryptoError::KeyUnavailable(format!("unwrap service client: {}", e)))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl UnwrapService for HttpUnwrapService {
    async fn fetch_wrapping_key(&self, reference: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&UnwrapRequest { encrypted_psek: reference });
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!("Unwrap service request to {} failed: {}", self.url, e);
            CryptoError::KeyUnavailable(format!("unwrap service unreachable: {}", e))
        })?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Unwrap service refused key reference: HTTP {}", status);
            return Err(CryptoError::KeyUnavailable(format!(
                "unwrap service returned HTTP {}",
                status
            )));
        }

        let body: UnwrapResponse = response.json().await.map_err(|e| {
            CryptoError::KeyUnavailable(format!("unwrap service response: {}", e))
        })?;
        let mut encoded = body.decrypted_psek.ok_or_else(|| {
            CryptoError::KeyUnavailable("unwrap service response has no key".to_string())
        })?;
        let decoded = STANDARD.decode(encoded.trim());
        encoded.zeroize();
        let key = decoded.map_err(|e| {
            CryptoError::KeyUnavailable(format!("unwrap service key is not base64: {}", e))
        })?;
        tracing::debug!("Unwrap service released a {} byte wrapping key", key.len());
        Ok(Zeroizing::new(key))
    }
}
