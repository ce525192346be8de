// src/artifact.rs - In-memory decrypted artifact
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("Artifact unavailable: {0}")]
    ArtifactUnavailable(String),
}

impl From<io::Error> for ArtifactError {
    fn from(e: io::Error) -> Self {
        ArtifactError::ArtifactUnavailable(e.to_string())
    }
}

/// Decrypted instruction text held only in process memory.
///
/// The buffer is read-only after construction and wiped when the artifact
/// is dropped. Reads and seeks move a cursor that never passes the end.
pub struct DecryptedArtifact {
    buf: Zeroizing<Vec<u8>>,
    cursor: usize,
}

impl DecryptedArtifact {
    pub(crate) fn from_zeroizing(buf: Zeroizing<Vec<u8>>) -> Self {
        Self { buf, cursor: 0 }
    }

    /// Wraps instruction text that was never encrypted.
    pub fn from_plaintext(bytes: Vec<u8>) -> Self {
        Self::from_zeroizing(Zeroizing::new(bytes))
    }

    pub fn total_size(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn current_cursor(&self) -> u64 {
        self.cursor as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub(crate) fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl Read for DecryptedArtifact {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.buf[self.cursor..];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }
}

impl Seek for DecryptedArtifact {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.buf.len() as i128;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => len + delta as i128,
            SeekFrom::Current(delta) => self.cursor as i128 + delta as i128,
        };
        if target < 0 || target > len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {} outside artifact of {} bytes", target, len),
            ));
        }
        self.cursor = target as usize;
        Ok(self.cursor as u64)
    }
}

impl fmt::Debug for DecryptedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedArtifact")
            .field("size", &self.buf.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Drop for DecryptedArtifact {
    fn drop(&mut self) {
        tracing::debug!("Releasing decrypted artifact ({} bytes)", self.buf.len());
    }
}
