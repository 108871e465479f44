//! TCP framing: length-prefix (4 bytes LE) + UTF-8 text payload.
//!
//! Chat payloads over TCP carry no intrinsic boundary, so frames are
//! explicit: one frame per logical message. UDP discovery datagrams are
//! NOT framed; they carry the raw literal text (see protocol module).

/// Length prefix size in bytes.
pub const LEN_SIZE: usize = 4;

/// Max payload size: one receive buffer's worth.
pub const MAX_FRAME_LEN: u32 = 65536;

/// Encode a text payload into a single frame: 4 bytes LE length + UTF-8 bytes.
pub fn encode_frame(text: &str) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = text.as_bytes();
    let len = payload.len() as u32;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Error encoding a payload into a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the text and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMore` if not enough bytes (caller retries after more data).
pub fn decode_frame(bytes: &[u8]) -> Result<(String, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let text = std::str::from_utf8(&bytes[LEN_SIZE..LEN_SIZE + len])
        .map_err(|_| FrameDecodeError::InvalidUtf8)?
        .to_owned();
    Ok((text, LEN_SIZE + len))
}

/// Error decoding a frame (need more bytes, too large, or not UTF-8).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
}
