//! Framed request/response transport to the automation backend.
//!
//! A [`BackendClient`] owns one stream and keeps at most one request in
//! flight. Any transport failure discards the stream, and the owner has to
//! reconnect. Session bookkeeping is layered on top in
//! [`crate::remote_driver`].

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, debug_span, trace, Instrument};

use crate::protocol::{
    decode_response, encode_request, read_frame_length, ErrorCode, MAX_FRAME_LEN, ProtocolError, Request,
    Response,
};

/// Budget for the TCP handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for one reply once its request has been written.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything the client can frame over: TCP sockets in production, in-memory
/// pipes in tests.
pub trait BackendStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BackendStream for T {}

#[derive(Error, Debug)]
pub enum BackendClientError {
    #[error("not connected to backend")]
    NotConnected,

    #[error("cannot reach backend: {0}")]
    ConnectionFailed(String),

    #[error("backend stream failed: {0}")]
    Io(#[from] io::Error),

    #[error("malformed backend reply: {0}")]
    Protocol(#[from] ProtocolError),

    /// An error reply. The backend's code is kept so callers can map it.
    #[error("backend rejected request ({code:?}): {message}")]
    Backend { code: ErrorCode, message: String },

    #[error("backend did not answer in time")]
    Timeout,
}

pub struct BackendClient {
    addr: Option<SocketAddr>,
    stream: Option<Box<dyn BackendStream>>,
    read_timeout: Duration,
}

impl BackendClient {
    /// Unconnected client for `addr`. Call [`connect`](Self::connect) first.
    pub fn new(addr: SocketAddr) -> Self {
        Self::from_parts(Some(addr), None)
    }

    /// Client over a stream that is already open. It has no address, so it
    /// cannot reconnect once the stream is discarded.
    pub fn from_stream(stream: impl BackendStream + 'static) -> Self {
        Self::from_parts(None, Some(Box::new(stream)))
    }

    fn from_parts(addr: Option<SocketAddr>, stream: Option<Box<dyn BackendStream>>) -> Self {
        Self {
            addr,
            stream,
            read_timeout: READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.set_read_timeout(read_timeout);
        self
    }

    /// Reply budget for the requests that follow. Starting a session needs
    /// far more than an ordinary command.
    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    pub async fn connect(&mut self) -> Result<(), BackendClientError> {
        let Some(addr) = self.addr else {
            return Err(BackendClientError::ConnectionFailed(
                "client was built from a stream and has no address".into(),
            ));
        };

        debug!(%addr, "connecting to backend");
        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(BackendClientError::ConnectionFailed(format!("{addr}: {e}"))),
            Err(_) => return Err(BackendClientError::Timeout),
        };

        self.stream = Some(Box::new(stream));
        debug!(%addr, "backend connected");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            trace!("backend stream closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// One round trip. Error replies surface as [`BackendClientError::Backend`].
    pub async fn send(&mut self, request: &Request) -> Result<Response, BackendClientError> {
        let span = debug_span!("backend_send", opcode = request.opcode_name());
        async {
            let payload = self.round_trip(&encode_request(request)).await?;
            match decode_response(&payload)? {
                Response::Error { code, message } => Err(BackendClientError::Backend { code, message }),
                response => Ok(response),
            }
        }
        .instrument(span)
        .await
    }

    pub async fn heartbeat(&mut self) -> Result<(), BackendClientError> {
        self.send(&Request::Heartbeat).await.map(drop)
    }

    /// Writes `frame` and reads back one reply payload. The stream is
    /// discarded on any failure: a late reply would otherwise be read as the
    /// answer to the next request.
    async fn round_trip(&mut self, frame: &[u8]) -> Result<Vec<u8>, BackendClientError> {
        let read_timeout = self.read_timeout;
        let stream = self.stream.as_mut().ok_or(BackendClientError::NotConnected)?;

        trace!(frame_bytes = frame.len(), "writing frame");
        let outcome = match write_flushed(&mut **stream, frame).await {
            Err(e) => Err(BackendClientError::Io(e)),
            Ok(()) => match timeout(read_timeout, read_payload(&mut **stream)).await {
                Ok(read) => read.map_err(BackendClientError::Io),
                Err(_) => Err(BackendClientError::Timeout),
            },
        };

        if outcome.is_err() {
            self.stream = None;
        }
        outcome
    }
}

async fn write_flushed<S: AsyncWrite + Unpin + ?Sized>(stream: &mut S, frame: &[u8]) -> io::Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await
}

/// Reads a length header and the payload it announces.
async fn read_payload<S: AsyncRead + Unpin + ?Sized>(stream: &mut S) -> io::Result<Vec<u8>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = read_frame_length(&header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("reply announces {len} bytes, limit is {MAX_FRAME_LEN}"),
        ));
    }

    trace!(payload_bytes = len, "reading frame");
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}
