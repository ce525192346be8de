//! sealed-print: streams encrypted print jobs to a printer host.
//!
//! A sealed job is unwrapped, decrypted into memory once, scanned for slicer
//! metadata, then fed line by line to a [`print_job::CommandDispatcher`] from
//! a cooperative tick loop. Plaintext never touches disk.

pub mod artifact;
pub mod config;
pub mod crypto;
pub mod gcode_utils;
pub mod metadata;
pub mod print_job;
pub mod stream;

pub use artifact::{ArtifactError, DecryptedArtifact};
pub use config::{EngineConfig, load_config};
pub use crypto::{ContentKey, CryptoError, DeviceKeys, KeyUnwrapper};
pub use metadata::{JobMetadata, MetadataScanner, MetadataSidecar};
pub use print_job::{
    CommandDispatcher, EncryptedJob, JobPhase, JobRunner, JobStatus, PrintJobController,
    PrintJobError, TickOutcome,
};
pub use stream::StreamingReader;
