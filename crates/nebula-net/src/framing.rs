//! Length-prefixed framing for stream transports.
//!
//! ```text
//! +-------------------+----------------------------+
//! | length (4 bytes)  |   encoded message          |
//! | u32 little-endian |   (length bytes)           |
//! +-------------------+----------------------------+
//! ```
//!
//! The length excludes the prefix itself. Zero-length frames are keepalive
//! padding and are skipped by [`read_message`].

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::messages::{Message, decode_message, encode_message};
use crate::transport::TransportError;

/// Limits applied by the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest accepted frame body in bytes. Default: 1 MiB.
    pub max_frame_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1 << 20,
        }
    }
}

/// Errors that can occur while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame exceeds [`FrameConfig::max_frame_size`].
    #[error("frame of {size} bytes exceeds limit of {max}")]
    TooLarge {
        /// Offending size.
        size: usize,
        /// Configured limit.
        max: u32,
    },
    /// The peer closed the stream, possibly mid-frame.
    #[error("connection closed")]
    ConnectionClosed,
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn map_eof(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read one frame body.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await.map_err(map_eof)?;

    let len = u32::from_le_bytes(prefix);
    if len > config.max_frame_size {
        return Err(FrameError::TooLarge {
            size: len as usize,
            max: config.max_frame_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(map_eof)?;
    Ok(body)
}

/// Write one frame body, prefixed with its length.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    body: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = u32::try_from(body.len())
        .ok()
        .filter(|&len| len <= config.max_frame_size)
        .ok_or(FrameError::TooLarge {
            size: body.len(),
            max: config.max_frame_size,
        })?;

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read frames until one carries a message, then decode it.
pub async fn read_message<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Message, TransportError> {
    loop {
        let body = read_frame(reader, config).await?;
        if !body.is_empty() {
            return decode_message(&body);
        }
    }
}

/// Encode and frame a message.
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message: &Message,
    config: &FrameConfig,
) -> Result<(), TransportError> {
    let body = encode_message(message)?;
    write_frame(writer, &body, config).await?;
    Ok(())
}
