//! Wire format for frame serialization.
//!
//! Frame format: `[length:4][payload:N]`
//!
//! - **length**: payload size in bytes (big-endian u32), header excluded
//! - **payload**: one codec-encoded message
//!
//! The receiver never yields a frame until all `length` bytes are buffered, so
//! partial messages are invisible above this layer however the stream is
//! chunked.

/// Header size: 4 bytes of length.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size (1 MiB).
///
/// Frames larger than the configured bound are rejected to prevent memory
/// exhaustion.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Payload exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Length field has an invalid value.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },
}

/// Frame a payload.
///
/// Returns: `[length:4][payload:N]`
///
/// # Errors
///
/// Returns `FrameTooLarge` if the payload exceeds `max_frame_size`, and
/// `InvalidLength` for an empty payload.
///
/// # Examples
///
/// ```
/// use robobus_transport::wire::{encode_frame, try_decode_frame, DEFAULT_MAX_FRAME_SIZE};
///
/// let frame = encode_frame(b"hello", DEFAULT_MAX_FRAME_SIZE).expect("encode");
/// assert_eq!(&frame[..4], &[0, 0, 0, 5]);
///
/// let (payload, consumed) = try_decode_frame(&frame, DEFAULT_MAX_FRAME_SIZE)
///     .expect("decode")
///     .expect("complete");
/// assert_eq!(payload, b"hello");
/// assert_eq!(consumed, frame.len());
/// ```
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<Vec<u8>, WireError> {
    if payload.len() > max_frame_size || payload.len() > u32::MAX as usize {
        return Err(WireError::FrameTooLarge {
            size: payload.len(),
            max: max_frame_size,
        });
    }
    if payload.is_empty() {
        return Err(WireError::InvalidLength { length: 0 });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Try to decode one frame from a buffer that may contain partial data.
///
/// # Returns
///
/// - `Ok(Some((payload, consumed)))` if a complete frame was parsed
/// - `Ok(None)` if more data is needed (not an error condition)
/// - `Err` if the header is invalid or announces an oversized frame
///
/// The size check happens as soon as the header is readable, before the
/// payload is buffered.
pub fn try_decode_frame(
    data: &[u8],
    max_frame_size: usize,
) -> Result<Option<(Vec<u8>, usize)>, WireError> {
    let Some(header) = data.get(..HEADER_SIZE) else {
        return Ok(None); // Need more data for header
    };

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if length == 0 {
        return Err(WireError::InvalidLength { length });
    }
    let size = length as usize;
    if size > max_frame_size {
        return Err(WireError::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }

    let total = HEADER_SIZE + size;
    if data.len() < total {
        return Ok(None); // Need more data for payload
    }

    Ok(Some((data[HEADER_SIZE..total].to_vec(), total)))
}

/// Incremental deframer for one link's inbound byte stream.
///
/// Feed it bytes in whatever chunks the socket delivers; pull complete
/// payloads with [`next_frame`](Self::next_frame).
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder enforcing `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    /// Append received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete payload, if one is buffered.
    ///
    /// # Errors
    ///
    /// A `WireError` means the stream can no longer be trusted to realign; the
    /// link should be torn down.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        match try_decode_frame(&self.buffer, self.max_frame_size)? {
            Some((payload, consumed)) => {
                self.buffer.drain(..consumed);
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
