//! Error types for the cluster access layer
//!
//! Errors fall into three families: connection errors (transient, retried),
//! command errors reported by a node (some of which are permanent), and
//! exhaustion errors raised once the failover path gives up.

use crate::protocol::RespError;
use std::time::Duration;
use thiserror::Error;

/// Category of an error reply returned by a store node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// Malformed command (`ERR syntax error`, `SYNTAX ...`)
    Syntax,

    /// Operation against a key holding the wrong kind of value
    WrongType,

    /// Consumer group already exists
    BusyGroup,

    /// Anything else the node may report
    Other,
}

impl CommandErrorKind {
    /// Classify a server error message by its prefix and content
    pub fn classify(message: &str) -> Self {
        let upper = message.to_ascii_uppercase();
        if upper.starts_with("WRONGTYPE") {
            CommandErrorKind::WrongType
        } else if upper.starts_with("BUSYGROUP") {
            CommandErrorKind::BusyGroup
        } else if upper.starts_with("SYNTAX") || upper.contains("SYNTAX ERROR") {
            CommandErrorKind::Syntax
        } else {
            CommandErrorKind::Other
        }
    }
}

/// Errors produced by the cluster layer
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("connection to {node} failed: {reason}")]
    Connection { node: String, reason: String },

    #[error("operation on {node} timed out after {timeout:?}")]
    Timeout { node: String, timeout: Duration },

    #[error("protocol error from {node}: {source}")]
    Protocol {
        node: String,
        #[source]
        source: RespError,
    },

    #[error("node {0} is not connected")]
    NotConnected(String),

    #[error("{message}")]
    Command {
        kind: CommandErrorKind,
        message: String,
    },

    #[error("unexpected reply to {operation}: {reply}")]
    UnexpectedReply { operation: &'static str, reply: String },

    #[error("no healthy store nodes available")]
    NoHealthyNodes,

    #[error("operation '{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<ClusterError>,
    },

    #[error("node {0} is already registered")]
    DuplicateNode(String),

    #[error("node {0} is not registered")]
    UnknownNode(String),

    #[error("unknown load balance strategy '{0}'")]
    UnknownStrategy(String),

    #[error("unknown ring hash function '{0}'")]
    UnknownHashFunction(String),

    #[error("cluster mode is not active")]
    NotClusterMode,

    #[error("invalid cluster configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("configuration file {path}: {reason}")]
    ConfigIo { path: String, reason: String },
}

impl ClusterError {
    /// Build a command error from a server error reply
    pub fn command(message: impl Into<String>) -> Self {
        let message = message.into();
        ClusterError::Command {
            kind: CommandErrorKind::classify(&message),
            message,
        }
    }

    /// Whether the failover loop may try this operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            ClusterError::Command { kind, .. } => *kind == CommandErrorKind::Other,
            ClusterError::UnexpectedReply { .. } => false,
            _ => true,
        }
    }

    /// Whether the error came from the transport rather than the server
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClusterError::Connection { .. }
                | ClusterError::Timeout { .. }
                | ClusterError::Protocol { .. }
                | ClusterError::NotConnected(_)
        )
    }

    /// The command error kind, if any
    pub fn command_kind(&self) -> Option<CommandErrorKind> {
        match self {
            ClusterError::Command { kind, .. } => Some(*kind),
            ClusterError::RetriesExhausted { source, .. } => source.command_kind(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_server_errors() {
        assert_eq!(
            CommandErrorKind::classify("WRONGTYPE Operation against a key holding the wrong kind of value"),
            CommandErrorKind::WrongType
        );
        assert_eq!(
            CommandErrorKind::classify("BUSYGROUP Consumer Group name already exists"),
            CommandErrorKind::BusyGroup
        );
        assert_eq!(CommandErrorKind::classify("ERR syntax error"), CommandErrorKind::Syntax);
        assert_eq!(CommandErrorKind::classify("ERR unknown command 'FOO'"), CommandErrorKind::Other);
    }

    #[test]
    fn test_retryable_split() {
        assert!(!ClusterError::command("WRONGTYPE bad").is_retryable());
        assert!(!ClusterError::command("ERR syntax error").is_retryable());
        assert!(ClusterError::command("LOADING dataset in memory").is_retryable());
        assert!(ClusterError::NotConnected("a".into()).is_retryable());
        assert!(ClusterError::NoHealthyNodes.is_retryable());
    }

    #[test]
    fn test_exhaustion_names_last_cause() {
        let err = ClusterError::RetriesExhausted {
            operation: "GET",
            attempts: 3,
            source: Box::new(ClusterError::NotConnected("redis-1".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("GET"));
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("redis-1"));
    }
}
