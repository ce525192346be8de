//! Pull-based line reader over a decrypted artifact or a plaintext file.
//!
//! The reader refills a fixed-size chunk buffer and splits it on `\n`. A
//! fragment left at the end of a chunk is carried into the next refill, so
//! no line is ever truncated at a chunk boundary.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::artifact::{ArtifactError, DecryptedArtifact};

/// Where a reader pulls bytes from.
#[derive(Debug)]
pub enum ReaderSource {
    Memory(DecryptedArtifact),
    Disk(File),
}

impl Read for ReaderSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReaderSource::Memory(artifact) => artifact.read(buf),
            ReaderSource::Disk(file) => file.read(buf),
        }
    }
}

impl Seek for ReaderSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            ReaderSource::Memory(artifact) => artifact.seek(pos),
            ReaderSource::Disk(file) => file.seek(pos),
        }
    }
}

/// One instruction line.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    text: String,
    offset: u64,
    advance: u64,
}

impl Line {
    fn from_raw(raw: Vec<u8>, offset: u64, advance: u64) -> Self {
        let mut text = match String::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        if text.ends_with('\r') {
            text.pop();
        }
        Self {
            text,
            offset,
            advance,
        }
    }

    /// Line content without its terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Byte offset of the first byte of this line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes this line occupies in the artifact, terminator included.
    pub fn advance(&self) -> u64 {
        self.advance
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

pub struct StreamingReader {
    source: ReaderSource,
    size: u64,
    chunk: Vec<u8>,
    chunk_size: usize,
    lines: VecDeque<Line>,
    partial: Vec<u8>,
    partial_offset: u64,
    position: u64,
    eof: bool,
}

impl StreamingReader {
    pub fn from_artifact(mut artifact: DecryptedArtifact, chunk_size: usize) -> Self {
        artifact.rewind();
        let size = artifact.total_size();
        Self::new(ReaderSource::Memory(artifact), size, chunk_size)
    }

    pub fn open_file(path: &Path, chunk_size: usize) -> Result<Self, ArtifactError> {
        let file = File::open(path).map_err(|e| {
            ArtifactError::ArtifactUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let size = file.metadata()?.len();
        Ok(Self::new(ReaderSource::Disk(file), size, chunk_size))
    }

    fn new(source: ReaderSource, size: u64, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            source,
            size,
            chunk: vec![0; chunk_size],
            chunk_size,
            lines: VecDeque::new(),
            partial: Vec::new(),
            partial_offset: 0,
            position: 0,
            eof: false,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_memory_resident(&self) -> bool {
        matches!(self.source, ReaderSource::Memory(_))
    }

    /// Offset of the next line `next_line` will return.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Returns the next complete line, or `None` at end of input. A final
    /// line without a terminator is still returned, with an `advance` equal
    /// to its raw length.
    pub fn next_line(&mut self) -> Result<Option<Line>, ArtifactError> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                self.position = line.offset + line.advance;
                return Ok(Some(line));
            }
            if self.eof {
                if self.partial.is_empty() {
                    return Ok(None);
                }
                let raw = std::mem::take(&mut self.partial);
                let advance = raw.len() as u64;
                let line = Line::from_raw(raw, self.partial_offset, advance);
                self.partial_offset += advance;
                self.position = self.partial_offset;
                return Ok(Some(line));
            }
            self.refill()?;
        }
    }

    fn refill(&mut self) -> Result<(), ArtifactError> {
        let n = loop {
            match self.source.read(&mut self.chunk[..self.chunk_size]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            self.eof = true;
            return Ok(());
        }

        let data = &self.chunk[..n];
        let mut start = 0;
        while let Some(rel) = data[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            self.partial.extend_from_slice(&data[start..end]);
            let raw = std::mem::take(&mut self.partial);
            let advance = raw.len() as u64 + 1;
            self.lines
                .push_back(Line::from_raw(raw, self.partial_offset, advance));
            self.partial_offset += advance;
            start = end + 1;
        }
        self.partial.extend_from_slice(&data[start..]);
        Ok(())
    }

    /// Repositions the reader so the next line starts at `offset`.
    pub fn seek(&mut self, offset: u64) -> Result<(), ArtifactError> {
        if offset > self.size {
            return Err(ArtifactError::ArtifactUnavailable(format!(
                "seek to {} beyond end of {} byte artifact",
                offset, self.size
            )));
        }
        self.source.seek(SeekFrom::Start(offset))?;
        self.lines.clear();
        self.partial.clear();
        self.partial_offset = offset;
        self.position = offset;
        self.eof = false;
        Ok(())
    }

    /// Runs `f` against the raw source, then puts the source cursor back
    /// where the reader left it.
    pub fn with_source<T>(
        &mut self,
        f: impl FnOnce(&mut ReaderSource) -> Result<T, ArtifactError>,
    ) -> Result<T, ArtifactError> {
        let saved = self.source.stream_position()?;
        let result = f(&mut self.source);
        self.source.seek(SeekFrom::Start(saved))?;
        result
    }

    /// Up to `len` bytes from the start of the source.
    pub fn peek_head(&mut self, len: usize) -> Result<Vec<u8>, ArtifactError> {
        self.with_source(|source| {
            source.seek(SeekFrom::Start(0))?;
            let mut head = Vec::with_capacity(len);
            source.take(len as u64).read_to_end(&mut head)?;
            Ok(head)
        })
    }

    /// Text immediately before and after `position`, for diagnostics.
    pub fn context_around(
        &mut self,
        position: u64,
        before: usize,
        after: usize,
    ) -> Result<(String, String), ArtifactError> {
        let position = position.min(self.size);
        let start = position.saturating_sub(before as u64);
        self.with_source(|source| {
            source.seek(SeekFrom::Start(start))?;
            let mut buf = Vec::with_capacity(before + after);
            source
                .take((position - start) + after as u64)
                .read_to_end(&mut buf)?;
            let split = ((position - start) as usize).min(buf.len());
            Ok((
                String::from_utf8_lossy(&buf[..split]).into_owned(),
                String::from_utf8_lossy(&buf[split..]).into_owned(),
            ))
        })
    }
}

impl Iterator for StreamingReader {
    type Item = Result<Line, ArtifactError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}
