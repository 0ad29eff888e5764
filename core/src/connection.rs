//! Connection handling
//!
//! Every connection owns exactly one writer task. Command handlers and the
//! event relay never touch the socket: they push complete lines onto the
//! connection's bounded outbound queue, which the writer drains in order.

use crate::{Error, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Sending side of a connection's outbound line queue
#[derive(Debug, Clone)]
pub struct Outbound {
    sender: mpsc::Sender<String>,
}

impl Outbound {
    /// Create a queue holding at most `capacity` pending lines
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Queue one complete line, waiting while the queue is full
    pub async fn send(&self, line: String) -> Result<()> {
        self.sender
            .send(line)
            .await
            .map_err(|_| Error::Connection("Outbound queue closed".to_string()))
    }

    /// Whether the writer has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Identity and shared handles of one accepted connection
#[derive(Debug, Clone)]
pub struct ClientConnection {
    /// Unique connection ID
    pub id: Uuid,
    /// Remote address
    pub remote_addr: SocketAddr,
    /// Outbound line queue
    pub outbound: Outbound,
    /// Cancelled when the connection is closing
    pub closing: CancellationToken,
}

impl ClientConnection {
    /// Create the handles for a new connection
    pub fn new(remote_addr: SocketAddr, send_queue: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbound, receiver) = Outbound::channel(send_queue);
        let connection = Self {
            id: Uuid::new_v4(),
            remote_addr,
            outbound,
            closing: CancellationToken::new(),
        };
        (connection, receiver)
    }

    /// Ask every task tied to this connection to stop
    pub fn close(&self) {
        self.closing.cancel();
    }
}

/// Drain the outbound queue into the socket until the connection closes.
///
/// Lines still queued when the connection starts closing are flushed before
/// the write half is shut down, so a final `ERROR` line reaches the client.
pub async fn write_lines<W>(
    connection_id: Uuid,
    mut writer: W,
    mut lines: mpsc::Receiver<String>,
    closing: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = closing.cancelled() => break,
        };
        let Some(line) = line else { break };
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!("Error writing to client {}: {}", connection_id, e);
            closing.cancel();
            return;
        }
    }

    while let Ok(line) = lines.try_recv() {
        if writer.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
    tracing::debug!("Writer for client {} stopped", connection_id);
}

/// Trait for connection streams (TCP or TLS)
pub trait ConnectionStream: Send + Sync {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReadHalf>, Box<dyn ConnectionWriteHalf>);
}

/// Trait for connection read half
pub trait ConnectionReadHalf: Send + Sync + tokio::io::AsyncRead + Unpin {}

/// Trait for connection write half
pub trait ConnectionWriteHalf: Send + Sync + tokio::io::AsyncWrite + Unpin {}

impl ConnectionStream for TcpStream {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReadHalf>, Box<dyn ConnectionWriteHalf>) {
        let (read, write) = tokio::io::split(*self);
        (Box::new(read), Box::new(write))
    }
}

impl ConnectionReadHalf for tokio::io::ReadHalf<TcpStream> {}
impl ConnectionWriteHalf for tokio::io::WriteHalf<TcpStream> {}

impl ConnectionStream for TlsStream<TcpStream> {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReadHalf>, Box<dyn ConnectionWriteHalf>) {
        let (read, write) = tokio::io::split(*self);
        (Box::new(read), Box::new(write))
    }
}

impl ConnectionReadHalf for tokio::io::ReadHalf<TlsStream<TcpStream>> {}
impl ConnectionWriteHalf for tokio::io::WriteHalf<TlsStream<TcpStream>> {}
