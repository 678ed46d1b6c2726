//! RESP2 (REdis Serialization Protocol) frames
//!
//! Parsing is incremental: a buffer holding a partial frame yields
//! `Ok(None)` and is left untouched until more bytes arrive.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Largest bulk string accepted from a client (512 MiB)
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest array accepted from a client (1Mi elements)
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Deepest array nesting accepted from a client
const MAX_DEPTH: usize = 8;

/// One RESP2 value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$6\r\nfoobar\r\n`
    Bulk(Bytes),
    /// `$-1\r\n`
    Null,
    /// `*2\r\n...`
    Array(Vec<Frame>),
    /// `*-1\r\n`
    NullArray,
}

/// Malformed client input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// First byte is not a RESP type marker
    UnknownType(u8),
    /// Length or integer field is not a number
    BadInteger(String),
    /// Negative length other than -1
    BadLength(i64),
    /// Bulk string over the size limit
    BulkTooLarge(usize),
    /// Array over the element limit
    ArrayTooLarge(usize),
    /// Arrays nested deeper than the limit
    TooDeep,
    /// Bulk payload not followed by CRLF
    MissingCrlf,
    /// Simple string or error is not UTF-8
    InvalidUtf8,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownType(b) => write!(f, "unknown RESP type byte {:?}", *b as char),
            ProtocolError::BadInteger(s) => write!(f, "invalid integer {:?}", s),
            ProtocolError::BadLength(n) => write!(f, "invalid length {}", n),
            ProtocolError::BulkTooLarge(n) => {
                write!(f, "bulk string too large: {} bytes (max {})", n, MAX_BULK_LEN)
            }
            ProtocolError::ArrayTooLarge(n) => {
                write!(f, "array too large: {} elements (max {})", n, MAX_ARRAY_LEN)
            }
            ProtocolError::TooDeep => {
                write!(f, "arrays nested deeper than {} levels", MAX_DEPTH)
            }
            ProtocolError::MissingCrlf => write!(f, "expected CRLF after bulk string"),
            ProtocolError::InvalidUtf8 => write!(f, "invalid UTF-8 in simple string"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl Frame {
    /// Shorthand for a bulk frame from anything byte-like
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    /// Shorthand for an error reply
    pub fn error(msg: impl Into<String>) -> Self {
        Frame::Error(msg.into())
    }

    /// Pop one complete frame off the front of `buf`
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        match parse_at(&buf[..], 0, 0)? {
            Some((frame, consumed)) => {
                buf.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Append the wire form of this frame to `out`
    pub fn write_to(&self, out: &mut BytesMut) {
        match self {
            Frame::Simple(s) => write_line(out, b'+', s.as_bytes()),
            Frame::Error(e) => write_line(out, b'-', e.as_bytes()),
            Frame::Integer(n) => write_line(out, b':', n.to_string().as_bytes()),
            Frame::Bulk(data) => {
                write_line(out, b'$', data.len().to_string().as_bytes());
                out.put_slice(data);
                out.put_slice(b"\r\n");
            }
            Frame::Null => out.put_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                write_line(out, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.write_to(out);
                }
            }
            Frame::NullArray => out.put_slice(b"*-1\r\n"),
        }
    }

    /// Wire form as a fresh buffer
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::new();
        self.write_to(&mut out);
        out
    }
}

fn write_line(out: &mut BytesMut, tag: u8, body: &[u8]) {
    out.put_u8(tag);
    out.put_slice(body);
    out.put_slice(b"\r\n");
}

/// Parse the frame starting at `pos`, returning it and the offset just
/// past it. `depth` counts the arrays enclosing this frame.
fn parse_at(
    src: &[u8],
    pos: usize,
    depth: usize,
) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let Some(&tag) = src.get(pos) else {
        return Ok(None);
    };
    let Some((line, after)) = read_line(src, pos + 1) else {
        return Ok(None);
    };

    let frame = match tag {
        b'+' => Frame::Simple(utf8(line)?),
        b'-' => Frame::Error(utf8(line)?),
        b':' => Frame::Integer(parse_int(line)?),
        b'$' => {
            let Some(len) = parse_len(line)? else {
                return Ok(Some((Frame::Null, after)));
            };
            if len > MAX_BULK_LEN {
                return Err(ProtocolError::BulkTooLarge(len));
            }
            let end = after + len;
            if src.len() < end + 2 {
                return Ok(None);
            }
            if &src[end..end + 2] != b"\r\n" {
                return Err(ProtocolError::MissingCrlf);
            }
            return Ok(Some((Frame::Bulk(Bytes::copy_from_slice(&src[after..end])), end + 2)));
        }
        b'*' => {
            let Some(len) = parse_len(line)? else {
                return Ok(Some((Frame::NullArray, after)));
            };
            if len > MAX_ARRAY_LEN {
                return Err(ProtocolError::ArrayTooLarge(len));
            }
            if len > 0 && depth >= MAX_DEPTH {
                return Err(ProtocolError::TooDeep);
            }
            // Don't trust the declared length for the allocation
            let mut items = Vec::with_capacity(len.min(64));
            let mut cursor = after;
            for _ in 0..len {
                match parse_at(src, cursor, depth + 1)? {
                    Some((item, next)) => {
                        items.push(item);
                        cursor = next;
                    }
                    None => return Ok(None),
                }
            }
            return Ok(Some((Frame::Array(items), cursor)));
        }
        other => return Err(ProtocolError::UnknownType(other)),
    };
    Ok(Some((frame, after)))
}

fn read_line(src: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = src.get(start..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..end], start + end + 2))
}

fn utf8(line: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(line.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

fn parse_int(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProtocolError::BadInteger(String::from_utf8_lossy(line).into_owned()))
}

/// Length field: `None` for the -1 null marker
fn parse_len(line: &[u8]) -> Result<Option<usize>, ProtocolError> {
    match parse_int(line)? {
        -1 => Ok(None),
        n if n < 0 => Err(ProtocolError::BadLength(n)),
        n => Ok(Some(n as usize)),
    }
}
