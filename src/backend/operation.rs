//! Store operations
//!
//! The closed set of commands the cluster layer can dispatch to a node. Each
//! variant carries its own arguments and knows how to render itself as a RESP
//! request, so an unsupported operation cannot be expressed at all.

use crate::protocol::RespValue;
use bytes::Bytes;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Ping,
    DbSize,
    Info { section: Option<String> },

    Get { key: String },
    Set { key: String, value: Bytes, expire_secs: Option<u64> },
    Del { keys: Vec<String> },
    Exists { key: String },
    Expire { key: String, seconds: i64 },

    LPush { key: String, values: Vec<Bytes> },
    RPush { key: String, values: Vec<Bytes> },
    LPop { key: String },
    RPop { key: String },
    LLen { key: String },
    LRange { key: String, start: i64, stop: i64 },
    LTrim { key: String, start: i64, stop: i64 },

    HSet { key: String, field: String, value: Bytes },
    HGet { key: String, field: String },
    HGetAll { key: String },
    HDel { key: String, fields: Vec<String> },

    SAdd { key: String, members: Vec<Bytes> },
    SRem { key: String, members: Vec<Bytes> },
    SMembers { key: String },

    XAdd { stream: String, fields: Vec<(String, Bytes)>, max_len: Option<usize> },
    XRange { stream: String, start: String, end: String, count: Option<usize> },
    XRead { streams: Vec<(String, String)>, count: Option<usize>, block_ms: Option<u64> },
    XLen { stream: String },
    XGroupCreate { stream: String, group: String, id: String, mkstream: bool },
}

impl Operation {
    /// Command name, used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Ping => "PING",
            Operation::DbSize => "DBSIZE",
            Operation::Info { .. } => "INFO",
            Operation::Get { .. } => "GET",
            Operation::Set { .. } => "SET",
            Operation::Del { .. } => "DEL",
            Operation::Exists { .. } => "EXISTS",
            Operation::Expire { .. } => "EXPIRE",
            Operation::LPush { .. } => "LPUSH",
            Operation::RPush { .. } => "RPUSH",
            Operation::LPop { .. } => "LPOP",
            Operation::RPop { .. } => "RPOP",
            Operation::LLen { .. } => "LLEN",
            Operation::LRange { .. } => "LRANGE",
            Operation::LTrim { .. } => "LTRIM",
            Operation::HSet { .. } => "HSET",
            Operation::HGet { .. } => "HGET",
            Operation::HGetAll { .. } => "HGETALL",
            Operation::HDel { .. } => "HDEL",
            Operation::SAdd { .. } => "SADD",
            Operation::SRem { .. } => "SREM",
            Operation::SMembers { .. } => "SMEMBERS",
            Operation::XAdd { .. } => "XADD",
            Operation::XRange { .. } => "XRANGE",
            Operation::XRead { .. } => "XREAD",
            Operation::XLen { .. } => "XLEN",
            Operation::XGroupCreate { .. } => "XGROUP",
        }
    }

    /// The key a consistent-hash strategy should route this operation by
    pub fn routing_key(&self) -> Option<&str> {
        match self {
            Operation::Ping | Operation::DbSize | Operation::Info { .. } => None,
            Operation::Del { keys } => keys.first().map(String::as_str),
            Operation::XRead { streams, .. } => streams.first().map(|(s, _)| s.as_str()),
            Operation::Get { key }
            | Operation::Set { key, .. }
            | Operation::Exists { key }
            | Operation::Expire { key, .. }
            | Operation::LPush { key, .. }
            | Operation::RPush { key, .. }
            | Operation::LPop { key }
            | Operation::RPop { key }
            | Operation::LLen { key }
            | Operation::LRange { key, .. }
            | Operation::LTrim { key, .. }
            | Operation::HSet { key, .. }
            | Operation::HGet { key, .. }
            | Operation::HGetAll { key }
            | Operation::HDel { key, .. }
            | Operation::SAdd { key, .. }
            | Operation::SRem { key, .. }
            | Operation::SMembers { key } => Some(key.as_str()),
            Operation::XAdd { stream, .. }
            | Operation::XRange { stream, .. }
            | Operation::XLen { stream }
            | Operation::XGroupCreate { stream, .. } => Some(stream.as_str()),
        }
    }

    /// How long the server may hold this operation before replying
    pub fn blocking_for(&self) -> Option<Duration> {
        match self {
            Operation::XRead {
                block_ms: Some(ms), ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Render the operation as a RESP request array
    pub fn to_command(&self) -> RespValue {
        let mut parts: Vec<Bytes> = vec![Bytes::from_static(self.name().as_bytes())];

        match self {
            Operation::Ping | Operation::DbSize => {}
            Operation::Info { section } => {
                if let Some(section) = section {
                    parts.push(section.clone().into());
                }
            }
            Operation::Get { key }
            | Operation::Exists { key }
            | Operation::LPop { key }
            | Operation::RPop { key }
            | Operation::LLen { key }
            | Operation::HGetAll { key }
            | Operation::SMembers { key } => parts.push(key.clone().into()),
            Operation::Set { key, value, expire_secs } => {
                parts.push(key.clone().into());
                parts.push(value.clone());
                if let Some(secs) = expire_secs {
                    parts.push(Bytes::from_static(b"EX"));
                    parts.push(secs.to_string().into());
                }
            }
            Operation::Del { keys } => parts.extend(keys.iter().cloned().map(Bytes::from)),
            Operation::Expire { key, seconds } => {
                parts.push(key.clone().into());
                parts.push(seconds.to_string().into());
            }
            Operation::LPush { key, values } | Operation::RPush { key, values } => {
                parts.push(key.clone().into());
                parts.extend(values.iter().cloned());
            }
            Operation::LRange { key, start, stop } | Operation::LTrim { key, start, stop } => {
                parts.push(key.clone().into());
                parts.push(start.to_string().into());
                parts.push(stop.to_string().into());
            }
            Operation::HSet { key, field, value } => {
                parts.push(key.clone().into());
                parts.push(field.clone().into());
                parts.push(value.clone());
            }
            Operation::HGet { key, field } => {
                parts.push(key.clone().into());
                parts.push(field.clone().into());
            }
            Operation::HDel { key, fields } => {
                parts.push(key.clone().into());
                parts.extend(fields.iter().cloned().map(Bytes::from));
            }
            Operation::SAdd { key, members } | Operation::SRem { key, members } => {
                parts.push(key.clone().into());
                parts.extend(members.iter().cloned());
            }
            Operation::XAdd { stream, fields, max_len } => {
                parts.push(stream.clone().into());
                if let Some(max_len) = max_len {
                    parts.push(Bytes::from_static(b"MAXLEN"));
                    parts.push(max_len.to_string().into());
                }
                parts.push(Bytes::from_static(b"*"));
                for (field, value) in fields {
                    parts.push(field.clone().into());
                    parts.push(value.clone());
                }
            }
            Operation::XRange { stream, start, end, count } => {
                parts.push(stream.clone().into());
                parts.push(start.clone().into());
                parts.push(end.clone().into());
                if let Some(count) = count {
                    parts.push(Bytes::from_static(b"COUNT"));
                    parts.push(count.to_string().into());
                }
            }
            Operation::XRead { streams, count, block_ms } => {
                if let Some(count) = count {
                    parts.push(Bytes::from_static(b"COUNT"));
                    parts.push(count.to_string().into());
                }
                if let Some(block) = block_ms {
                    parts.push(Bytes::from_static(b"BLOCK"));
                    parts.push(block.to_string().into());
                }
                parts.push(Bytes::from_static(b"STREAMS"));
                parts.extend(streams.iter().map(|(s, _)| Bytes::from(s.clone())));
                parts.extend(streams.iter().map(|(_, id)| Bytes::from(id.clone())));
            }
            Operation::XLen { stream } => parts.push(stream.clone().into()),
            Operation::XGroupCreate { stream, group, id, mkstream } => {
                parts.push(Bytes::from_static(b"CREATE"));
                parts.push(stream.clone().into());
                parts.push(group.clone().into());
                parts.push(id.clone().into());
                if *mkstream {
                    parts.push(Bytes::from_static(b"MKSTREAM"));
                }
            }
        }

        RespValue::command(parts)
    }
}
