//! Request and response body buffering with spill to disk.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::debug;

/// Bytes written so far, in memory until `memory_limit` and in a temp file
/// after that.
#[derive(Debug, Default)]
pub struct BodyBuffer {
    memory_limit: usize,
    tmp_dir: PathBuf,
    memory: Vec<u8>,
    file: Option<NamedTempFile>,
    length: usize,
}

impl BodyBuffer {
    /// Create a buffer that spills into `tmp_dir` once it would reach
    /// `memory_limit` bytes.
    pub fn new(memory_limit: usize, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            memory_limit,
            tmp_dir: tmp_dir.into(),
            memory: Vec::new(),
            file: None,
            length: 0,
        }
    }

    /// Append `data`, spilling to disk if needed.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.file.is_none() && self.length + data.len() >= self.memory_limit {
            let mut file = tempfile::Builder::new()
                .prefix("body-")
                .tempfile_in(&self.tmp_dir)?;
            file.write_all(&self.memory)?;
            debug!(path = %file.path().display(), buffered = self.memory.len(), "body spilled to disk");
            self.memory = Vec::new();
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(file) => file.write_all(data)?,
            None => self.memory.extend_from_slice(data),
        }
        self.length += data.len();
        Ok(data.len())
    }

    /// Bytes written.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether the body lives in a temp file.
    pub fn is_spilled(&self) -> bool {
        self.file.is_some()
    }

    /// A reader positioned at the start of the body.
    pub fn reader(&mut self) -> io::Result<BodyReader<'_>> {
        match self.file.as_mut() {
            Some(file) => {
                let mut handle: File = file.reopen()?;
                handle.seek(SeekFrom::Start(0))?;
                Ok(BodyReader::File(handle))
            }
            None => Ok(BodyReader::Memory(Cursor::new(&self.memory))),
        }
    }

    /// The whole body.
    pub fn to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.length);
        self.reader()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Release memory and delete the temp file.
    pub fn reset(&mut self) {
        self.memory = Vec::new();
        if let Some(file) = self.file.take() {
            if let Err(e) = file.close() {
                debug!(error = %e, "failed to remove body temp file");
            }
        }
        self.length = 0;
    }
}

/// Reader over a [`BodyBuffer`].
#[derive(Debug)]
pub enum BodyReader<'a> {
    /// Body held in memory.
    Memory(Cursor<&'a Vec<u8>>),
    /// Body spilled to disk.
    File(File),
}

impl Read for BodyReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BodyReader::Memory(c) => c.read(buf),
            BodyReader::File(f) => f.read(buf),
        }
    }
}
