//! RESP2 value types
//!
//! Defines the frames exchanged with store nodes, plus the conversions the
//! client side needs to turn replies into plain Rust values.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// RESP2 value types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple strings: +OK\r\n
    SimpleString(String),

    /// Errors: -Error message\r\n
    Error(String),

    /// Integers: :1000\r\n
    Integer(i64),

    /// Bulk strings: $6\r\nfoobar\r\n
    BulkString(Bytes),

    /// Null bulk string or null array: $-1\r\n
    Null,

    /// Arrays: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(i: i64) -> Self {
        RespValue::Integer(i)
    }

    pub fn bulk_string(b: impl Into<Bytes>) -> Self {
        RespValue::BulkString(b.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(v: Vec<RespValue>) -> Self {
        RespValue::Array(v)
    }

    /// Build a request frame: an array of bulk strings
    pub fn command<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespValue::Array(parts.into_iter().map(|p| RespValue::BulkString(p.into())).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn as_array(&self) -> Option<&Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_bulk_string(&self) -> Option<&Bytes> {
        match self {
            RespValue::BulkString(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Integer value, also accepting a numeric bulk string
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// Raw bytes of a string-like reply
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b),
            RespValue::SimpleString(s) => Some(Bytes::from(s)),
            RespValue::Integer(i) => Some(Bytes::from(i.to_string())),
            _ => None,
        }
    }

    /// UTF-8 text of a string-like reply (lossy)
    pub fn into_text(self) -> Option<String> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => Some(String::from_utf8_lossy(&b).into_owned()),
            RespValue::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Elements of an array reply; `Null` reads as an empty array
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
            RespValue::Null => Some(Vec::new()),
            _ => None,
        }
    }

    /// Whether the reply is the `+OK` acknowledgement
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::SimpleString(s) if s.eq_ignore_ascii_case("OK"))
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "SimpleString({})", s),
            RespValue::Error(e) => write!(f, "Error({})", e),
            RespValue::Integer(i) => write!(f, "Integer({})", i),
            RespValue::BulkString(b) => write!(f, "BulkString({} bytes)", b.len()),
            RespValue::Null => write!(f, "Null"),
            RespValue::Array(arr) => write!(f, "Array({} elements)", arr.len()),
        }
    }
}

/// RESP parsing errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RespError {
    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("invalid UTF-8")]
    InvalidUtf8,

    #[error("invalid integer")]
    InvalidInteger,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = RespValue::command(["SET", "k", "v"]);
        assert_eq!(
            cmd,
            RespValue::Array(vec![
                RespValue::bulk_string("SET"),
                RespValue::bulk_string("k"),
                RespValue::bulk_string("v"),
            ])
        );
    }

    #[test]
    fn test_reply_conversions() {
        assert_eq!(RespValue::bulk_string("42").as_integer(), Some(42));
        assert_eq!(RespValue::Null.into_array(), Some(Vec::new()));
        assert!(RespValue::simple_string("OK").is_ok());
        assert!(!RespValue::simple_string("QUEUED").is_ok());
        assert_eq!(RespValue::integer(7).into_text().as_deref(), Some("7"));
    }
}
