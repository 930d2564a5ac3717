//! RESP2 framing for the FalkorDB/Redis wire protocol.
//!
//! Requests are arrays of bulk strings. Responses are nested arrays of
//! simple strings, errors, integers, and bulk byte strings. The decoder is
//! incremental: it returns `Ok(None)` until a complete frame is buffered.

use std::fmt;

/// Refuse frames nested deeper than this.
const MAX_DEPTH: usize = 32;
/// Refuse bulk strings larger than this (512 MiB, the Redis limit).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Refuse arrays declaring more elements than this.
const MAX_ARRAY_LEN: i64 = 16 * 1024 * 1024;
/// Refuse header lines longer than this without a CRLF.
const MAX_LINE_LEN: usize = 64 * 1024;

/// A decoded RESP value.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Text content of a simple or bulk string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Simple(s) => Some(s),
            Self::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Malformed bytes on the wire. Always fatal for the connection that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DecodeError {}

/// Encode a command as an array of bulk strings.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let payload: usize = args.iter().map(|a| a.as_ref().len() + 16).sum();
    let mut out = Vec::with_capacity(16 + payload);
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        let bytes = arg.as_ref();
        out.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
        out.extend_from_slice(bytes);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Encode a frame. Used by test servers and for symmetry with `decode`.
pub fn encode_frame(frame: &Frame, out: &mut Vec<u8>) {
    match frame {
        Frame::Simple(s) => {
            out.push(b'+');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Frame::Error(s) => {
            out.push(b'-');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Frame::Integer(i) => out.extend_from_slice(format!(":{i}\r\n").as_bytes()),
        Frame::Bulk(b) => {
            out.extend_from_slice(format!("${}\r\n", b.len()).as_bytes());
            out.extend_from_slice(b);
            out.extend_from_slice(b"\r\n");
        }
        Frame::Null => out.extend_from_slice(b"$-1\r\n"),
        Frame::Array(items) => {
            out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode_frame(item, out);
            }
        }
    }
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes consumed, or `None` if `buf`
/// holds only a prefix of a frame.
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
    parse(buf, 0, 0)
}

fn parse(buf: &[u8], pos: usize, depth: usize) -> Result<Option<(Frame, usize)>, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError(format!("frame nesting exceeds {MAX_DEPTH}")));
    }
    if pos >= buf.len() {
        return Ok(None);
    }

    let tag = buf[pos];
    let Some((line, next)) = read_line(buf, pos + 1)? else {
        return Ok(None);
    };

    match tag {
        b'+' => Ok(Some((Frame::Simple(utf8(line)?), next))),
        b'-' => Ok(Some((Frame::Error(utf8(line)?), next))),
        b':' => Ok(Some((Frame::Integer(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((Frame::Null, next)));
            }
            if !(0..=MAX_BULK_LEN).contains(&len) {
                return Err(DecodeError(format!("invalid bulk length {len}")));
            }
            let end = next + len as usize;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(DecodeError("bulk string not terminated by CRLF".into()));
            }
            Ok(Some((Frame::Bulk(buf[next..end].to_vec()), end + 2)))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((Frame::Null, next)));
            }
            if !(0..=MAX_ARRAY_LEN).contains(&len) {
                return Err(DecodeError(format!("invalid array length {len}")));
            }
            let mut items = Vec::with_capacity((len as usize).min(1024));
            let mut cursor = next;
            for _ in 0..len {
                match parse(buf, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Frame::Array(items), cursor)))
        }
        other => Err(DecodeError(format!(
            "unexpected type byte 0x{other:02x} at offset {pos}"
        ))),
    }
}

fn read_line(buf: &[u8], start: usize) -> Result<Option<(&[u8], usize)>, DecodeError> {
    let window = &buf[start.min(buf.len())..];
    match window.windows(2).position(|w| w == b"\r\n") {
        Some(idx) => Ok(Some((&window[..idx], start + idx + 2))),
        None if window.len() > MAX_LINE_LEN => {
            Err(DecodeError("header line exceeds maximum length".into()))
        }
        None => Ok(None),
    }
}

fn utf8(line: &[u8]) -> Result<String, DecodeError> {
    String::from_utf8(line.to_vec()).map_err(|_| DecodeError("invalid UTF-8 in line".into()))
}

fn parse_int(line: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DecodeError(format!("invalid integer {:?}", String::from_utf8_lossy(line))))
}
