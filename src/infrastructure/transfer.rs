//! Chunked byte streaming with progress reporting and cancellation, plus
//! file hashing for integrity checks.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::DomainError;

/// Read/write capability of a stream endpoint.
///
/// Most streams are fully capable; wrappers around half-open handles override
/// the relevant method so misuse is rejected before any I/O.
pub trait StreamAccess {
    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        true
    }
}

impl StreamAccess for tokio::fs::File {}
impl StreamAccess for Vec<u8> {}
impl StreamAccess for &[u8] {}
impl<T> StreamAccess for std::io::Cursor<T> {}
impl<R> StreamAccess for tokio::io::BufReader<R> {}
impl<W> StreamAccess for tokio::io::BufWriter<W> {}
impl<S, B> StreamAccess for tokio_util::io::StreamReader<S, B> {}

/// Progress of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    /// Cumulative bytes copied so far.
    pub bytes_read: u64,
    /// Total size when the server supplied a content length.
    pub total_bytes: Option<u64>,
}

/// Copy `source` into `destination` in `buffer_size` chunks.
///
/// `progress` receives the cumulative byte count after every chunk. A token
/// canceled before the first read copies nothing; a token canceled mid-stream
/// stops after the in-flight read and discards it. Cancellation is not an
/// error: the caller inspects the token. Argument problems are reported before
/// any I/O happens.
pub async fn copy_with_progress<R, W>(
    source: Option<&mut R>,
    destination: Option<&mut W>,
    buffer_size: usize,
    progress: Option<&(dyn Fn(u64) + Send + Sync)>,
    cancel: &CancellationToken,
) -> Result<u64, DomainError>
where
    R: AsyncRead + StreamAccess + Unpin + ?Sized,
    W: AsyncWrite + StreamAccess + Unpin + ?Sized,
{
    let source = source.ok_or(DomainError::NullArgument("source"))?;
    if !source.can_read() {
        return Err(DomainError::invalid_argument("source", "has to be readable"));
    }

    let destination = destination.ok_or(DomainError::NullArgument("destination"))?;
    if !destination.can_write() {
        return Err(DomainError::invalid_argument(
            "destination",
            "has to be writable",
        ));
    }

    if buffer_size == 0 {
        return Err(DomainError::invalid_argument(
            "buffer_size",
            "must be greater than zero",
        ));
    }

    let mut buffer = vec![0u8; buffer_size];
    let mut total: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            debug!(bytes = total, "Copy canceled");
            break;
        }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(bytes = total, "Copy canceled during read");
                break;
            }
            result = source.read(&mut buffer) => {
                result.map_err(|e| DomainError::TransferFailure(format!("read failed: {}", e)))?
            }
        };

        if read == 0 {
            break;
        }

        if cancel.is_cancelled() {
            debug!(bytes = total, "Copy canceled after read");
            break;
        }

        destination
            .write_all(&buffer[..read])
            .await
            .map_err(|e| DomainError::TransferFailure(format!("write failed: {}", e)))?;

        total += read as u64;

        if let Some(report) = progress {
            report(total);
        }
    }

    destination
        .flush()
        .await
        .map_err(|e| DomainError::TransferFailure(format!("flush failed: {}", e)))?;

    Ok(total)
}

/// Calculate SHA-256 hash of a file as lowercase hex.
pub fn calculate_sha256(path: &Path) -> Result<String, DomainError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| DomainError::Io(e.to_string()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let result = hasher.finalize();
    Ok(format!("{:x}", result))
}
