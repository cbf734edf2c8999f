use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK_SIZE: usize = 4096;

/// Upstream byte source delivering chunks in arrival order.
///
/// Chunk boundaries carry no meaning relative to record boundaries.
#[async_trait]
pub trait ChunkSource: Send {
    /// `None` once the source is exhausted or disconnected
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Reads chunks from any async reader (serial device, file, stdin)
pub struct ReaderSource<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, READ_CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            buf: vec![0; chunk_size.max(1)],
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ChunkSource for ReaderSource<R> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let n = self
            .reader
            .read(&mut self.buf)
            .await
            .context("Failed to read from transport")?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf[..n].to_vec()))
    }
}

/// Replays a fixed list of chunks
#[derive(Debug, Default, Clone)]
pub struct ScriptedSource {
    chunks: VecDeque<Vec<u8>>,
}

impl ScriptedSource {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    /// Splits `text` into chunks of `size` bytes, ignoring char boundaries
    pub fn split_every(text: &str, size: usize) -> Self {
        Self {
            chunks: text
                .as_bytes()
                .chunks(size.max(1))
                .map(<[u8]>::to_vec)
                .collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

#[async_trait]
impl ChunkSource for ScriptedSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.chunks.pop_front())
    }
}
