//! RESP2 parser and encoder
//!
//! The parser first scans for the end of a frame without building values,
//! then decodes the frame in one pass. A `RespParser` kept alongside a read
//! buffer remembers how far the pending frame has been scanned, so each byte
//! is looked at once however the reply is split across reads. Arrays nested
//! deeper than `MAX_DEPTH` are rejected.

use super::types::{RespError, RespValue};
use bytes::{BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Deepest array nesting accepted in a reply
pub const MAX_DEPTH: usize = 64;

/// RESP2 Parser
#[derive(Debug, Default)]
pub struct RespParser {
    /// Bytes of the pending frame already known to be well formed
    scanned: usize,

    /// Elements still expected by each open array, innermost last
    open: Vec<u64>,
}

/// Read position over a borrowed buffer
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Next line without its CRLF, or None if the terminator has not arrived
    fn line(&mut self) -> Option<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let end = rest.windows(2).position(|w| w == CRLF)?;
        self.pos += end + 2;
        Some(&rest[..end])
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.data.len() - self.pos < len {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }
}

impl RespParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a RESP value from a buffer
    ///
    /// Returns Ok(Some(value)) and advances the buffer when a complete frame
    /// was read, Ok(None) without touching the buffer when more data is
    /// needed, Err(e) when the bytes are not valid RESP2.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        RespParser::new().next_frame(buf)
    }

    /// Like `parse`, for a buffer that only grows between calls
    ///
    /// Scanning resumes where the previous call stopped.
    pub fn next_frame(&mut self, buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        let len = match self.scan(&buf[..]) {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        let frame = buf.split_to(len);
        let mut reader = Reader { data: &frame[..], pos: 0 };
        match Self::parse_value(&mut reader)? {
            Some(value) => Ok(Some(value)),
            None => Err(RespError::InvalidProtocol("truncated frame".to_string())),
        }
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.open.clear();
    }

    /// Length of the first complete frame, or None if it has not arrived
    fn scan(&mut self, data: &[u8]) -> Result<Option<usize>, RespError> {
        let mut reader = Reader { data, pos: self.scanned };

        loop {
            let line = match reader.line() {
                Some(line) => line,
                None => return Ok(None),
            };
            let (prefix, body) = Self::header(line)?;

            let complete = match prefix {
                b'+' | b'-' | b':' => true,
                b'$' => match Self::number(body)? {
                    -1 => true,
                    len if len < 0 => {
                        return Err(RespError::InvalidProtocol(format!(
                            "invalid bulk string length: {}",
                            len
                        )))
                    }
                    len => match reader.take(len as usize + 2) {
                        Some(data) if data.ends_with(CRLF) => true,
                        Some(_) => {
                            return Err(RespError::InvalidProtocol(
                                "missing CRLF after bulk string data".to_string(),
                            ))
                        }
                        // Rescan only this header once the body arrives
                        None => return Ok(None),
                    },
                },
                b'*' => match Self::number(body)? {
                    -1 | 0 => true,
                    count if count < 0 => {
                        return Err(RespError::InvalidProtocol(format!(
                            "invalid array count: {}",
                            count
                        )))
                    }
                    count => {
                        if self.open.len() >= MAX_DEPTH {
                            return Err(RespError::InvalidProtocol(format!(
                                "arrays nested deeper than {}",
                                MAX_DEPTH
                            )));
                        }
                        self.open.push(count as u64);
                        false
                    }
                },
                other => {
                    return Err(RespError::InvalidProtocol(format!(
                        "unknown type prefix: {}",
                        other as char
                    )))
                }
            };
            self.scanned = reader.pos;

            if !complete {
                continue;
            }
            // Close every array this value completes
            loop {
                match self.open.last_mut() {
                    None => {
                        let len = self.scanned;
                        self.reset();
                        return Ok(Some(len));
                    }
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }

    fn header(line: &[u8]) -> Result<(u8, &[u8]), RespError> {
        match line.split_first() {
            Some((prefix, body)) => Ok((*prefix, body)),
            None => Err(RespError::InvalidProtocol("empty frame header".to_string())),
        }
    }

    /// Decode one value; recursion is bounded by the nesting `scan` accepted
    fn parse_value(reader: &mut Reader<'_>) -> Result<Option<RespValue>, RespError> {
        let line = match reader.line() {
            Some(line) => line,
            None => return Ok(None),
        };
        let (prefix, body) = Self::header(line)?;

        match prefix {
            b'+' => Ok(Some(RespValue::SimpleString(Self::text(body)?))),
            b'-' => Ok(Some(RespValue::Error(Self::text(body)?))),
            b':' => Ok(Some(RespValue::Integer(Self::number(body)?))),
            b'$' => Self::parse_bulk_string(reader, Self::number(body)?),
            b'*' => Self::parse_array(reader, Self::number(body)?),
            other => Err(RespError::InvalidProtocol(format!(
                "unknown type prefix: {}",
                other as char
            ))),
        }
    }

    /// Bulk string body after its `$len` header; -1 is the null bulk string
    fn parse_bulk_string(reader: &mut Reader<'_>, len: i64) -> Result<Option<RespValue>, RespError> {
        if len == -1 {
            return Ok(Some(RespValue::Null));
        }
        if len < 0 {
            return Err(RespError::InvalidProtocol(format!("invalid bulk string length: {}", len)));
        }

        let data = match reader.take(len as usize) {
            Some(data) => data,
            None => return Ok(None),
        };

        match reader.take(2) {
            Some(CRLF) => Ok(Some(RespValue::BulkString(Bytes::copy_from_slice(data)))),
            Some(_) => Err(RespError::InvalidProtocol(
                "missing CRLF after bulk string data".to_string(),
            )),
            None => Ok(None),
        }
    }

    /// Array elements after the `*count` header; -1 is the null array
    fn parse_array(reader: &mut Reader<'_>, count: i64) -> Result<Option<RespValue>, RespError> {
        if count == -1 {
            return Ok(Some(RespValue::Null));
        }
        if count < 0 {
            return Err(RespError::InvalidProtocol(format!("invalid array count: {}", count)));
        }

        let mut elements = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            match Self::parse_value(reader)? {
                Some(value) => elements.push(value),
                None => return Ok(None),
            }
        }

        Ok(Some(RespValue::Array(elements)))
    }

    fn text(body: &[u8]) -> Result<String, RespError> {
        std::str::from_utf8(body)
            .map(str::to_owned)
            .map_err(|_| RespError::InvalidUtf8)
    }

    fn number(body: &[u8]) -> Result<i64, RespError> {
        std::str::from_utf8(body)
            .map_err(|_| RespError::InvalidUtf8)?
            .parse::<i64>()
            .map_err(|_| RespError::InvalidInteger)
    }
}

/// RESP2 Encoder
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_to(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_to(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(bytes) => {
                buf.put_u8(b'$');
                buf.put_slice(bytes.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(bytes);
                buf.put_slice(CRLF);
            }
            RespValue::Null => {
                buf.put_slice(b"$-1\r\n");
            }
            RespValue::Array(arr) => {
                buf.put_u8(b'*');
                buf.put_slice(arr.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for elem in arr {
                    Self::encode_to(buf, elem);
                }
            }
        }
    }
}
