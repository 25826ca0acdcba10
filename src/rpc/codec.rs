//! ZMTP 3.x frame codec (NULL mechanism).
//!
//! Wire format after the 64-byte greeting:
//! ```text
//! ┌───────────┬──────────────────────┬──────────────────┐
//! │ Flags (1B)│ Size (1B, or 8B BE   │ Body (Size B)    │
//! │ MORE|LONG │ when LONG is set)    │                  │
//! │ |COMMAND  │                      │                  │
//! └───────────┴──────────────────────┴──────────────────┘
//! ```
//!
//! A REQ message is an empty delimiter frame (MORE set) followed by the
//! body frames. The decoder accumulates incoming bytes and yields
//! complete frames, so a single socket read may carry part of a header,
//! part of a body, or several frames.

use crate::error::TransportError;

/// Greeting length, fixed by ZMTP 3.
pub const GREETING_SIZE: usize = 64;

/// Maximum frame body size (protects against memory exhaustion). Also
/// caps the total body size of one multipart message.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub const FLAG_MORE: u8 = 0x01;
pub const FLAG_LONG: u8 = 0x02;
pub const FLAG_COMMAND: u8 = 0x04;

const MECHANISM_NULL: &[u8] = b"NULL";
const READY: &[u8] = b"READY";
const SOCKET_TYPE: &[u8] = b"Socket-Type";

/// Build our greeting: ZMTP 3.0, NULL mechanism, not as-server.
pub fn greeting() -> [u8; GREETING_SIZE] {
    let mut g = [0u8; GREETING_SIZE];
    g[0] = 0xFF;
    g[9] = 0x7F;
    g[10] = 3;
    g[11] = 0;
    g[12..12 + MECHANISM_NULL.len()].copy_from_slice(MECHANISM_NULL);
    g
}

/// Validate the peer's greeting.
pub fn check_greeting(g: &[u8]) -> Result<(), TransportError> {
    if g.len() != GREETING_SIZE || g[0] != 0xFF || g[9] != 0x7F {
        return Err(TransportError::Protocol("bad greeting signature"));
    }
    if g[10] < 3 {
        return Err(TransportError::Protocol("peer speaks ZMTP < 3.0"));
    }
    let mechanism = &g[12..32];
    let end = mechanism.iter().position(|&b| b == 0).unwrap_or(mechanism.len());
    if &mechanism[..end] != MECHANISM_NULL {
        return Err(TransportError::Protocol("unsupported security mechanism"));
    }
    Ok(())
}

// ── Frames ───────────────────────────────────────────────────

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn more(&self) -> bool {
        self.flags & FLAG_MORE != 0
    }

    pub fn is_command(&self) -> bool {
        self.flags & FLAG_COMMAND != 0
    }
}

/// Append one frame to `out`, choosing the short or long size form.
pub fn encode_frame(flags: u8, body: &[u8], out: &mut Vec<u8>) {
    let flags = flags & (FLAG_MORE | FLAG_COMMAND);
    if let Ok(short) = u8::try_from(body.len()) {
        out.push(flags);
        out.push(short);
    } else {
        out.push(flags | FLAG_LONG);
        out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    }
    out.extend_from_slice(body);
}

/// Encode a multipart message; every part but the last carries MORE.
pub fn encode_message(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len() + 9).sum());
    for (i, part) in parts.iter().enumerate() {
        let flags = if i + 1 < parts.len() { FLAG_MORE } else { 0 };
        encode_frame(flags, part, &mut out);
    }
    out
}

/// Wrap a body in the REQ/REP envelope (empty delimiter, then body).
pub fn envelope(body: &[u8]) -> Vec<u8> {
    let delimiter: &[u8] = &[];
    encode_message(&[delimiter, body])
}

/// Strip the envelope delimiter and join the body parts.
pub fn open_envelope(parts: Vec<Vec<u8>>) -> Result<Vec<u8>, TransportError> {
    let mut parts = parts.into_iter();
    match parts.next() {
        Some(delimiter) if delimiter.is_empty() => Ok(parts.flatten().collect()),
        _ => Err(TransportError::Protocol("missing envelope delimiter")),
    }
}

/// Collects the parts of one multipart message, refusing to grow past
/// a total body size limit.
#[derive(Debug)]
pub struct MessageAssembler {
    parts: Vec<Vec<u8>>,
    size: usize,
    limit: usize,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_SIZE)
    }
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            parts: Vec::new(),
            size: 0,
            limit,
        }
    }

    /// Add a data frame. Returns the whole message once its last part
    /// arrives. Command frames must be filtered out by the caller.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Vec<Vec<u8>>>, TransportError> {
        self.size = self.size.saturating_add(frame.body.len());
        if self.size > self.limit {
            self.parts.clear();
            self.size = 0;
            return Err(TransportError::Protocol("message exceeds maximum size"));
        }
        let more = frame.more();
        self.parts.push(frame.body);
        if more {
            return Ok(None);
        }
        self.size = 0;
        Ok(Some(core::mem::take(&mut self.parts)))
    }
}

// ── READY command ────────────────────────────────────────────

/// Encoded READY command frame announcing `socket_type`.
pub fn ready_command(socket_type: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(32);
    body.push(READY.len() as u8);
    body.extend_from_slice(READY);
    body.push(SOCKET_TYPE.len() as u8);
    body.extend_from_slice(SOCKET_TYPE);
    body.extend_from_slice(&(socket_type.len() as u32).to_be_bytes());
    body.extend_from_slice(socket_type.as_bytes());

    let mut out = Vec::with_capacity(body.len() + 2);
    encode_frame(FLAG_COMMAND, &body, &mut out);
    out
}

/// Parse a READY command body and return the peer's socket type.
pub fn parse_ready(body: &[u8]) -> Result<String, TransportError> {
    let malformed = TransportError::Protocol("malformed READY command");

    let (&name_len, rest) = body.split_first().ok_or(malformed)?;
    let name_len = name_len as usize;
    if rest.len() < name_len || &rest[..name_len] != READY {
        return Err(TransportError::Protocol("expected READY command"));
    }

    let mut props = &rest[name_len..];
    let mut socket_type = None;
    while let Some((&key_len, rest)) = props.split_first() {
        let key_len = key_len as usize;
        if rest.len() < key_len + 4 {
            return Err(malformed);
        }
        let key = &rest[..key_len];
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&rest[key_len..key_len + 4]);
        let value_len = u32::from_be_bytes(len_bytes) as usize;
        let value_start = key_len + 4;
        if rest.len() < value_start + value_len {
            return Err(malformed);
        }
        let value = &rest[value_start..value_start + value_len];
        if key.eq_ignore_ascii_case(SOCKET_TYPE) {
            socket_type = Some(String::from_utf8_lossy(value).into_owned());
        }
        props = &rest[value_start + value_len..];
    }

    socket_type.ok_or(TransportError::Protocol("READY without Socket-Type"))
}

// ── Streaming decoder ────────────────────────────────────────

/// Streaming frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take `n` raw bytes (used for the unframed greeting).
    pub fn take_raw(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.buf.len() < n {
            return None;
        }
        Some(self.buf.drain(..n).collect())
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        let Some(&flags) = self.buf.first() else {
            return Ok(None);
        };
        if flags & !(FLAG_MORE | FLAG_LONG | FLAG_COMMAND) != 0 {
            return Err(TransportError::Protocol("reserved frame flags set"));
        }

        let (header, size) = if flags & FLAG_LONG != 0 {
            if self.buf.len() < 9 {
                return Ok(None);
            }
            let mut size = [0u8; 8];
            size.copy_from_slice(&self.buf[1..9]);
            (9, u64::from_be_bytes(size))
        } else {
            if self.buf.len() < 2 {
                return Ok(None);
            }
            (2, u64::from(self.buf[1]))
        };

        if size > MAX_FRAME_SIZE as u64 {
            return Err(TransportError::Protocol("frame exceeds maximum size"));
        }
        let size = size as usize;
        if self.buf.len() < header + size {
            return Ok(None);
        }

        let body = self.buf[header..header + size].to_vec();
        self.buf.drain(..header + size);
        Ok(Some(Frame {
            flags: flags & !FLAG_LONG,
            body,
        }))
    }

    /// Number of bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Reset decoder state (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
