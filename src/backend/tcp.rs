//! TCP connection handling
//!
//! Client side of a RESP2 connection: encodes request frames, reads until a
//! complete reply has been parsed, and enforces connect/socket timeouts.
//!
//! A connection whose round trip was abandoned after the request went out
//! still has that reply pending on the socket; it refuses further requests
//! and reports itself as not reusable.

use super::{Connector, NodeEndpoint, StoreConnection};
use crate::error::{ClusterError, Result};
use crate::protocol::{RespEncoder, RespParser, RespValue};
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// Opens `TcpConnection`s with fixed timeouts
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    socket_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, socket_timeout: Duration) -> Self {
        TcpConnector {
            connect_timeout,
            socket_timeout,
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &NodeEndpoint) -> Result<Box<dyn StoreConnection>> {
        let address = endpoint.address();

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClusterError::Connection {
                    node: endpoint.node_id.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ClusterError::Timeout {
                    node: endpoint.node_id.clone(),
                    timeout: self.connect_timeout,
                })
            }
        };

        // Nagle only delays small request frames
        let _ = stream.set_nodelay(true);

        let mut connection = TcpConnection::new(endpoint.node_id.clone(), stream, self.socket_timeout);

        if let Some(password) = &endpoint.password {
            connection
                .call(&RespValue::command(["AUTH".to_string(), password.clone()]))
                .await?;
        }

        info!("Opened connection to {} at {}", endpoint.node_id, address);
        Ok(Box::new(connection))
    }
}

/// RESP connection over TCP
pub struct TcpConnection {
    /// Node id, for error reporting
    node: String,

    stream: TcpStream,

    read_buffer: BytesMut,

    /// Scan state of the reply in `read_buffer`
    parser: RespParser,

    write_buffer: BytesMut,

    socket_timeout: Duration,

    /// Set while a request is written but its reply not fully read
    awaiting_reply: bool,
}

impl TcpConnection {
    pub fn new(node: String, stream: TcpStream, socket_timeout: Duration) -> Self {
        TcpConnection {
            node,
            stream,
            read_buffer: BytesMut::with_capacity(4096),
            parser: RespParser::new(),
            write_buffer: BytesMut::with_capacity(4096),
            socket_timeout,
            awaiting_reply: false,
        }
    }

    /// Write one frame and read back exactly one reply
    async fn round_trip(&mut self, command: &RespValue) -> Result<RespValue> {
        self.write_buffer.clear();
        RespEncoder::encode_to(&mut self.write_buffer, command);

        self.awaiting_reply = true;
        self.stream
            .write_all(&self.write_buffer)
            .await
            .map_err(|e| self.io_error(e))?;
        self.stream.flush().await.map_err(|e| self.io_error(e))?;

        loop {
            match self.parser.next_frame(&mut self.read_buffer) {
                Ok(Some(reply)) => {
                    self.awaiting_reply = false;
                    return Ok(reply);
                }
                Ok(None) => {}
                Err(source) => {
                    return Err(ClusterError::Protocol {
                        node: self.node.clone(),
                        source,
                    })
                }
            }

            let n = self
                .stream
                .read_buf(&mut self.read_buffer)
                .await
                .map_err(|e| self.io_error(e))?;

            // Connection closed
            if n == 0 {
                return Err(ClusterError::Connection {
                    node: self.node.clone(),
                    reason: "connection reset by peer".to_string(),
                });
            }

            debug!("Read {} bytes from {}", n, self.node);
        }
    }

    /// Round trip bounded by `deadline`, with error replies mapped to errors
    async fn call_within(&mut self, command: &RespValue, deadline: Duration) -> Result<RespValue> {
        if self.awaiting_reply {
            return Err(ClusterError::Connection {
                node: self.node.clone(),
                reason: "previous request was interrupted".to_string(),
            });
        }

        let reply = match timeout(deadline, self.round_trip(command)).await {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(ClusterError::Timeout {
                    node: self.node.clone(),
                    timeout: deadline,
                })
            }
        };

        match reply {
            RespValue::Error(message) => Err(ClusterError::command(message)),
            reply => Ok(reply),
        }
    }

    fn io_error(&self, e: std::io::Error) -> ClusterError {
        ClusterError::Connection {
            node: self.node.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl StoreConnection for TcpConnection {
    async fn call(&mut self, command: &RespValue) -> Result<RespValue> {
        self.call_within(command, self.socket_timeout).await
    }

    /// The socket timeout runs on top of the time the server may block
    async fn call_blocking(&mut self, command: &RespValue, block: Duration) -> Result<RespValue> {
        self.call_within(command, self.socket_timeout + block).await
    }

    fn is_reusable(&self) -> bool {
        !self.awaiting_reply
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(|e| self.io_error(e))
    }
}
