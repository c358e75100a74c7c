use std::cmp;
use std::io::{ErrorKind, Read, Write};

use thiserror::Error;

// 1Kb copy buffer, memory use stays flat regardless of the stream size
pub const CHUNK_SIZE: usize = 1024;

#[derive(Error, Debug)]
pub enum CopyError {
    #[error("read side failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("write side failed: {0}")]
    Write(#[source] std::io::Error),
}

/// Bounded memory copier, moves a stream through a fixed size buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCopier {
    chunk_size: usize,
}

impl StreamCopier {
    pub fn new(chunk_size: usize) -> Self {
        StreamCopier {
            chunk_size: cmp::max(chunk_size, 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn copy<R: Read + ?Sized, W: Write + ?Sized>(
        &self,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<u64, CopyError> {
        copy_chunked(reader, writer, self.chunk_size)
    }
}

impl Default for StreamCopier {
    fn default() -> Self {
        Self::new(CHUNK_SIZE)
    }
}

pub fn copy_chunked<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
) -> Result<u64, CopyError> {
    let mut in_buf = vec![0u8; cmp::max(chunk_size, 1)];
    let mut total: u64 = 0;

    loop {
        let len = match reader.read(&mut in_buf) {
            Ok(0) => return Ok(total),
            Ok(x) => x,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };

        writer
            .write_all(&in_buf[..len])
            .map_err(CopyError::Write)?;
        total += len as u64;
    }
}

pub fn fill_buf<R: Read>(data: &mut R, buf: &mut [u8]) -> std::io::Result<(bool, usize)> {
    let mut buf_read = 0;

    while buf_read < buf.len() {
        match data.read(&mut buf[buf_read..]) {
            Ok(0) => return Ok((true, buf_read)),
            Ok(x) => buf_read += x,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
    }
    Ok((false, buf_read))
}

pub fn flush_buf(in_buf: &mut Vec<u8>, buf: &mut [u8]) -> usize {
    // 1. Grab slice [0...min(buf.len(), in_buf.len()))
    let split_at = cmp::min(in_buf.len(), buf.len());
    // 2. Copy into buf
    buf[..split_at].clone_from_slice(&in_buf[..split_at]);
    // 3. Drop range from &mut in_buf
    in_buf.drain(..split_at);

    split_at
}
