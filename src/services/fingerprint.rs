//! Tee writer that fingerprints everything it writes with MD5.

use md5::Context;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the streaming copy buffer.
pub const COPY_BUF_LEN: usize = 32 * 1024;

/// Which side of a streaming copy failed.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("stream exceeded {limit} bytes")]
    LimitExceeded { limit: u64 },
}

/// Final state of a [`FingerprintWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Lowercase hex MD5 of every byte written.
    pub digest: String,
    pub bytes_written: u64,
}

/// Writes into `inner` while feeding the same bytes into an MD5 context.
pub struct FingerprintWriter<W> {
    inner: W,
    digest: Context,
    written: u64,
}

impl<W> FingerprintWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            digest: Context::new(),
            written: 0,
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf).await?;
        self.digest.consume(buf);
        self.written += buf.len() as u64;
        Ok(())
    }

    /// Stream `reader` to the sink until EOF.
    ///
    /// With `limit` set, the copy stops with [`CopyError::LimitExceeded`]
    /// as soon as the total written (including anything written before this
    /// call) would pass it.
    pub async fn copy_from<R>(&mut self, reader: &mut R, limit: Option<u64>) -> Result<u64, CopyError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; COPY_BUF_LEN];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut buf).await.map_err(CopyError::Read)?;
            if n == 0 {
                return Ok(copied);
            }
            if let Some(limit) = limit {
                if self.written + n as u64 > limit {
                    return Err(CopyError::LimitExceeded { limit });
                }
            }
            self.write_all(&buf[..n]).await.map_err(CopyError::Write)?;
            copied += n as u64;
        }
    }

    /// Flush the sink and hand it back together with the fingerprint.
    pub async fn finish(mut self) -> io::Result<(Fingerprint, W)> {
        self.inner.flush().await?;
        let fingerprint = Fingerprint {
            digest: format!("{:x}", self.digest.compute()),
            bytes_written: self.written,
        };
        Ok((fingerprint, self.inner))
    }
}
