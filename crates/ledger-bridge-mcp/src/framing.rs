// crates/ledger-bridge-mcp/src/framing.rs
// ============================================================================
// Module: Content-Length Framing
// Description: Async reader and writer for Content-Length framed payloads.
// Purpose: Share stdio framing between the server and the sidecar engine.
// Dependencies: tokio, thiserror
// ============================================================================

//! ## Overview
//! Frames are a header block of `Name: value` lines terminated by an empty
//! line, followed by exactly `Content-Length` bytes of body.
//!
//! ## Invariants
//! - Bodies larger than the caller's limit are rejected before allocation.
//! - Header blocks are capped at [`MAX_HEADER_BYTES`], including a header
//!   line that never ends.
//! - End of stream before any header byte is reported as [`FrameError::Closed`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum bytes accepted in one frame's header block.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Framing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The peer closed the stream between frames.
    #[error("stream closed")]
    Closed,
    /// The frame header was malformed.
    #[error("invalid frame: {0}")]
    Invalid(String),
    /// The declared body exceeds the configured limit.
    #[error("payload too large: {len} bytes exceeds {max}")]
    TooLarge {
        /// Declared body length.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// Underlying read or write failure.
    #[error("stream io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Framing
// ============================================================================

/// Reads one framed payload of at most `max_body_bytes`.
///
/// # Errors
///
/// Returns [`FrameError`] when the stream closes, the header is malformed or
/// oversized, or the body exceeds the limit.
pub async fn read_frame<R>(reader: &mut R, max_body_bytes: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    let mut saw_header = false;
    let mut header_bytes = 0usize;
    loop {
        line.clear();
        let remaining = MAX_HEADER_BYTES.saturating_sub(header_bytes);
        if remaining == 0 {
            return Err(header_too_large());
        }
        let limit = u64::try_from(remaining).unwrap_or(u64::MAX);
        let bytes = (&mut *reader)
            .take(limit)
            .read_line(&mut line)
            .await
            .map_err(|err| FrameError::Io(err.to_string()))?;
        header_bytes += bytes;
        if bytes > 0 && !line.ends_with('\n') && header_bytes >= MAX_HEADER_BYTES {
            return Err(header_too_large());
        }
        if bytes == 0 {
            return Err(if saw_header {
                FrameError::Invalid("stream ended inside header".to_string())
            } else {
                FrameError::Closed
            });
        }
        if line.trim().is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| FrameError::Invalid("invalid content length".to_string()))?;
            content_length = Some(parsed);
        }
    }
    let len =
        content_length.ok_or_else(|| FrameError::Invalid("missing content length".to_string()))?;
    if len > max_body_bytes {
        return Err(FrameError::TooLarge {
            len,
            max: max_body_bytes,
        });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|err| FrameError::Io(err.to_string()))?;
    Ok(buf)
}

/// Error for a header block over [`MAX_HEADER_BYTES`].
fn header_too_large() -> FrameError {
    FrameError::Invalid(format!("frame header exceeds {MAX_HEADER_BYTES} bytes"))
}

/// Writes one framed payload and flushes the writer.
///
/// # Errors
///
/// Returns [`FrameError::Io`] when the write fails.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    writer.write_all(header.as_bytes()).await.map_err(|err| FrameError::Io(err.to_string()))?;
    writer.write_all(payload).await.map_err(|err| FrameError::Io(err.to_string()))?;
    writer.flush().await.map_err(|err| FrameError::Io(err.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
