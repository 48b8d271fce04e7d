//! Transport Layer for the Queue Client
//!
//! Abstracts the connection to the queue manager for testability. Provides:
//! - Transport trait: interface for request/response exchange
//! - MockTransport: a session on the in-process queue manager
//! - TcpTransport: JSON lines over a TCP connection

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use jobsub_protocol::{QmgmtRequest, QmgmtResponse};

use crate::mock::{MockSchedd, SessionId};

use super::error::TransportError;

/// Transport trait for queue-manager communication
pub trait Transport: Send + Sync {
    /// Send a request and wait for its response
    fn execute(&self, request: &QmgmtRequest) -> Result<QmgmtResponse, TransportError>;

    /// Send a request that gets no response frame
    fn send(&self, request: &QmgmtRequest) -> Result<(), TransportError>;
}

/// Mock transport for testing - one session on an in-process queue manager.
///
/// Dropping the transport drops the session, which discards any transaction
/// left open.
pub struct MockTransport {
    schedd: MockSchedd,
    session: SessionId,
}

impl MockTransport {
    pub fn new(schedd: &MockSchedd) -> Self {
        let schedd = schedd.clone();
        let session = schedd.open_session();
        Self { schedd, session }
    }

    pub fn schedd(&self) -> &MockSchedd {
        &self.schedd
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &QmgmtRequest) -> Result<QmgmtResponse, TransportError> {
        self.schedd
            .handle_request(self.session, request)
            .ok_or_else(|| TransportError::Protocol(format!("no response to {}", request.command)))
    }

    fn send(&self, request: &QmgmtRequest) -> Result<(), TransportError> {
        let _ = self.schedd.handle_request(self.session, request);
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.schedd.close_session(self.session);
    }
}

/// TCP transport configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// `host:port` of the queue manager
    pub address: String,
    pub connect_timeout: Duration,
    /// Read and write timeout per request
    pub io_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9618".to_string(),
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(60),
        }
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

/// JSON-lines transport over one TCP connection.
///
/// Each request is written as a single line; responses are read back one
/// line at a time. Closing the connection ends the server-side session.
///
/// A failed exchange leaves the stream out of step with the server, so the
/// connection is shut down and every later call returns `Closed`.
pub struct TcpTransport {
    config: TcpConfig,
    conn: Mutex<Option<Connection>>,
}

impl TcpTransport {
    pub fn connect(config: TcpConfig) -> Result<Self, TransportError> {
        let addrs = config.address.to_socket_addrs().map_err(|e| {
            TransportError::ConnectionFailed(format!("cannot resolve {}: {}", config.address, e))
        })?;

        let mut last_error = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let stream = stream.ok_or_else(|| {
            TransportError::ConnectionFailed(match last_error {
                Some(e) => format!("{}: {}", config.address, e),
                None => format!("{}: no addresses", config.address),
            })
        })?;

        stream.set_read_timeout(Some(config.io_timeout))?;
        stream.set_write_timeout(Some(config.io_timeout))?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;

        tracing::debug!(address = %config.address, "connected to queue manager");
        Ok(Self {
            config,
            conn: Mutex::new(Some(Connection {
                reader: BufReader::new(stream),
                writer,
            })),
        })
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    fn write_request(conn: &mut Connection, line: &str) -> Result<(), TransportError> {
        conn.writer
            .write_all(line.as_bytes())
            .and_then(|_| conn.writer.flush())
            .map_err(TransportError::from_io)
    }

    fn encode(request: &QmgmtRequest) -> Result<String, TransportError> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        Ok(line)
    }

    fn round_trip(
        conn: &mut Connection,
        request: &QmgmtRequest,
        line: &str,
    ) -> Result<QmgmtResponse, TransportError> {
        Self::write_request(conn, line)?;

        let mut buf = String::new();
        let read = conn
            .reader
            .read_line(&mut buf)
            .map_err(TransportError::from_io)?;
        if read == 0 {
            return Err(TransportError::Closed);
        }

        let response: QmgmtResponse = serde_json::from_str(buf.trim_end())
            .map_err(|e| TransportError::Protocol(format!("Invalid response JSON: {}", e)))?;
        if response.request_id != request.request_id {
            return Err(TransportError::Protocol(format!(
                "response {} does not answer request {}",
                response.request_id, request.request_id
            )));
        }
        Ok(response)
    }

    /// Drop the connection after a failed exchange.
    fn sever(&self, slot: &mut Option<Connection>, err: &TransportError) {
        if let Some(conn) = slot.take() {
            let _ = conn.writer.shutdown(Shutdown::Both);
            tracing::warn!(address = %self.config.address, error = %err, "dropping queue manager connection");
        }
    }
}

impl Transport for TcpTransport {
    fn execute(&self, request: &QmgmtRequest) -> Result<QmgmtResponse, TransportError> {
        let line = Self::encode(request)?;
        let mut slot = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = slot.as_mut().ok_or(TransportError::Closed)?;
        match Self::round_trip(conn, request, &line) {
            Ok(response) => Ok(response),
            Err(err) => {
                self.sever(&mut slot, &err);
                Err(err)
            }
        }
    }

    fn send(&self, request: &QmgmtRequest) -> Result<(), TransportError> {
        let line = Self::encode(request)?;
        let mut slot = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = slot.as_mut().ok_or(TransportError::Closed)?;
        if let Err(err) = Self::write_request(conn, &line) {
            self.sever(&mut slot, &err);
            return Err(err);
        }
        Ok(())
    }
}
