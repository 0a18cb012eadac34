//! Bandwidth-limited artifact streaming.
//!
//! Artifacts are read in `buffer_size` chunks. Each chunk draws its length in
//! bytes from a token bucket refilled at `max_download_speed` bytes per
//! second with a capacity of one chunk, so the average rate converges to the
//! ceiling and never runs ahead of it by more than one chunk. Waiting for
//! tokens is an async sleep; no thread is held.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::io;
use std::num::NonZeroU32;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Item type carried to the response body.
pub type BodyChunk = Result<Bytes, io::Error>;

/// Why a chunk could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The receiving side went away, e.g. the client disconnected.
    #[error("sink closed")]
    Closed,
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// Destination of streamed chunks.
#[async_trait]
pub trait ChunkSink: Send {
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), SinkError>;
}

#[async_trait]
impl ChunkSink for mpsc::Sender<BodyChunk> {
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        self.send(Ok(chunk)).await.map_err(|_| SinkError::Closed)
    }
}

/// How a transfer ended without a server fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { bytes_sent: u64 },
    /// The client stopped receiving before the end of the artifact.
    Aborted { bytes_sent: u64 },
}

impl TransferOutcome {
    pub fn bytes_sent(&self) -> u64 {
        match self {
            Self::Completed { bytes_sent } | Self::Aborted { bytes_sent } => *bytes_sent,
        }
    }
}

/// A transfer that failed on the server side.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to read artifact after {bytes_sent} bytes: {source}")]
    Read { source: io::Error, bytes_sent: u64 },
    #[error("failed to write chunk after {bytes_sent} bytes: {source}")]
    Write { source: io::Error, bytes_sent: u64 },
}

/// Chunking and pacing for one transfer.
pub struct Pacer {
    chunk_size: NonZeroU32,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl Pacer {
    /// `max_download_speed == 0` disables pacing. A zero `buffer_size` is
    /// rejected at config validation; here it falls back to one byte.
    pub fn new(max_download_speed: u32, buffer_size: u32) -> Self {
        let chunk_size = NonZeroU32::new(buffer_size).unwrap_or(NonZeroU32::MIN);
        let limiter = NonZeroU32::new(max_download_speed)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate).allow_burst(chunk_size)));
        Self {
            chunk_size,
            limiter,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get() as usize
    }

    /// Wait until `len` bytes may be sent.
    async fn wait(&self, len: usize) {
        let (Some(limiter), Some(n)) = (
            &self.limiter,
            u32::try_from(len).ok().and_then(NonZeroU32::new),
        ) else {
            return;
        };
        // len never exceeds the chunk size, which is the bucket capacity
        if limiter.until_n_ready(n).await.is_err() {
            tracing::warn!(len = len, "chunk larger than pacing burst, sending unpaced");
        }
    }
}

/// Stream `reader` into `sink` under the pacing of `pacer`.
///
/// Returns as soon as the sink reports it is closed; the caller owns the
/// download permit and releases it when this returns.
pub async fn stream_artifact<R, S>(
    mut reader: R,
    sink: &mut S,
    pacer: &Pacer,
) -> Result<TransferOutcome, TransferError>
where
    R: AsyncRead + Unpin + Send,
    S: ChunkSink + ?Sized,
{
    let chunk_size = pacer.chunk_size();
    let mut buf = BytesMut::with_capacity(chunk_size);
    let mut bytes_sent = 0u64;

    loop {
        buf.clear();
        buf.reserve(chunk_size);
        let n = (&mut reader)
            .take(chunk_size as u64)
            .read_buf(&mut buf)
            .await
            .map_err(|source| TransferError::Read { source, bytes_sent })?;
        if n == 0 {
            return Ok(TransferOutcome::Completed { bytes_sent });
        }

        pacer.wait(n).await;

        match sink.send_chunk(buf.split().freeze()).await {
            Ok(()) => bytes_sent += n as u64,
            Err(SinkError::Closed) => return Ok(TransferOutcome::Aborted { bytes_sent }),
            Err(SinkError::Io(source)) => {
                return Err(TransferError::Write { source, bytes_sent });
            }
        }
    }
}
