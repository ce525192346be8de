// src/print_job/mod.rs - Job state, status and error types
pub mod controller;
pub mod dispatcher;
pub mod runner;
pub mod throttle;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::crypto::{BLOCK_LEN, CryptoError};

pub use controller::{CancelHandle, ControllerStats, PrintJobController, TickOutcome};
pub use dispatcher::{CommandDispatcher, DispatchError, DispatchOutcome, StatusFields};
pub use runner::JobRunner;
pub use throttle::NotifyThrottle;

#[derive(Debug, Error)]
pub enum PrintJobError {
    #[error("Invalid state transition: cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: JobPhase },
    #[error("Job {0} is still active on this device")]
    DeviceBusy(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    #[default]
    Standby,
    Decrypting,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Standby => "standby",
            JobPhase::Decrypting => "decrypting",
            JobPhase::Printing => "printing",
            JobPhase::Paused => "paused",
            JobPhase::Complete => "complete",
            JobPhase::Cancelled => "cancelled",
            JobPhase::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Complete | JobPhase::Cancelled | JobPhase::Error)
    }

    /// A job exists and has not reached a terminal phase.
    pub fn is_active(&self) -> bool {
        matches!(self, JobPhase::Decrypting | JobPhase::Printing | JobPhase::Paused)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-device job progress. Owned and mutated only by the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintJobState {
    pub phase: JobPhase,
    pub job_id: Option<String>,
    pub filename: Option<String>,
    pub current_layer: u32,
    pub file_position: u64,
    pub file_size: u64,
    pub filament_used_mm: f64,
    pub message: Option<String>,
}

impl PrintJobState {
    pub fn progress(&self) -> f64 {
        if self.file_size == 0 {
            0.0
        } else {
            (self.file_position as f64 / self.file_size as f64).clamp(0.0, 1.0)
        }
    }
}

/// Snapshot published to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub state: JobPhase,
    pub job_id: Option<String>,
    pub filename: Option<String>,
    pub file_position: u64,
    pub file_size: u64,
    pub progress: f64,
    pub current_layer: u32,
    pub layer_count: u32,
    pub filament_used_mm: f64,
    pub estimated_time_s: u64,
    pub print_duration_s: f64,
    pub total_duration_s: Option<f64>,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            state: JobPhase::Standby,
            job_id: None,
            filename: None,
            file_position: 0,
            file_size: 0,
            progress: 0.0,
            current_layer: 0,
            layer_count: 0,
            filament_used_mm: 0.0,
            estimated_time_s: 0,
            print_duration_s: 0.0,
            total_duration_s: None,
            message: None,
            updated_at: Utc::now(),
        }
    }
}

/// A sealed job as delivered to the device.
#[derive(Clone)]
pub struct EncryptedJob {
    pub job_id: String,
    pub encrypted_payload: Vec<u8>,
    pub key_package: String,
    pub kek_reference: Option<String>,
    pub iv: [u8; BLOCK_LEN],
    pub filename: Option<String>,
}

impl EncryptedJob {
    pub fn new(
        job_id: impl Into<String>,
        encrypted_payload: Vec<u8>,
        key_package: impl Into<String>,
        iv: [u8; BLOCK_LEN],
    ) -> Self {
        Self {
            job_id: job_id.into(),
            encrypted_payload,
            key_package: key_package.into(),
            kek_reference: None,
            iv,
            filename: None,
        }
    }

    /// Builds a job from its wire form, where the IV travels as hex.
    pub fn from_wire(
        job_id: impl Into<String>,
        encrypted_payload: Vec<u8>,
        key_package: impl Into<String>,
        iv_hex: &str,
    ) -> Result<Self, CryptoError> {
        let bytes = hex::decode(iv_hex.trim())
            .map_err(|e| CryptoError::DecryptFailed(format!("iv is not hex: {}", e)))?;
        let iv: [u8; BLOCK_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::DecryptFailed(format!("iv must be {} bytes, got {}", BLOCK_LEN, bytes.len()))
        })?;
        Ok(Self::new(job_id, encrypted_payload, key_package, iv))
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_kek_reference(mut self, reference: impl Into<String>) -> Self {
        self.kek_reference = Some(reference.into());
        self
    }

    /// Name the job is registered under with the dispatcher.
    pub fn virtual_filename(&self, started_at: DateTime<Utc>) -> String {
        virtual_filename(self.filename.as_deref(), &self.job_id, started_at)
    }
}

impl fmt::Debug for EncryptedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedJob")
            .field("job_id", &self.job_id)
            .field("payload_len", &self.encrypted_payload.len())
            .field("kek_reference", &self.kek_reference.is_some())
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

pub(crate) fn virtual_filename(
    filename: Option<&str>,
    job_id: &str,
    started_at: DateTime<Utc>,
) -> String {
    match filename.map(str::trim).filter(|f| !f.is_empty()) {
        Some(name) => format!("virtual_{}", name),
        None => format!("virtual_{}_{}.gcode", job_id, started_at.timestamp()),
    }
}
