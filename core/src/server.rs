//! Connection acceptor
//!
//! Binds the listener, optionally wraps accepted sockets in TLS and runs one
//! task per connection that frames lines and dispatches them to the command
//! handlers of that connection's session.

use crate::commands::Dispatcher;
use crate::connection::{write_lines, ClientConnection, ConnectionReadHalf, ConnectionStream};
use crate::message::ParsedCommand;
use crate::registry::SessionRegistry;
use crate::remote::WorkspaceConnector;
use crate::session::{BridgeSettings, Session};
use crate::{Config, Error, Result};
use rustls::{Certificate, PrivateKey, ServerConfig};
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader as AsyncBufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// State shared by every connection task
struct Shared {
    settings: Arc<BridgeSettings>,
    connector: Arc<dyn WorkspaceConnector>,
    dispatcher: Dispatcher,
    registry: Arc<SessionRegistry>,
    send_queue: usize,
}

/// The IRC-facing gateway server
pub struct Server {
    config: Config,
    shared: Arc<Shared>,
    tls_acceptor: Option<TlsAcceptor>,
}

impl Server {
    /// Create a server that connects sessions through `connector`
    pub fn new(config: Config, connector: Arc<dyn WorkspaceConnector>) -> Self {
        let shared = Arc::new(Shared {
            settings: Arc::new(BridgeSettings::from_config(&config)),
            connector,
            dispatcher: Dispatcher::with_default_handlers(),
            registry: Arc::new(SessionRegistry::new()),
            send_queue: config.server.send_queue,
        });
        Self {
            config,
            shared,
            tls_acceptor: None,
        }
    }

    /// Initialize the server
    pub async fn init(&mut self) -> Result<()> {
        self.config.validate()?;

        if self.config.tls.enabled {
            self.setup_tls()?;
        }

        tracing::info!("Server {} initialized", self.config.server.name);
        Ok(())
    }

    /// Setup TLS configuration
    fn setup_tls(&mut self) -> Result<()> {
        let cert_file = self
            .config
            .tls
            .cert_file
            .as_ref()
            .ok_or_else(|| Error::Config("TLS certificate file not specified".to_string()))?;
        let key_file = self
            .config
            .tls
            .key_file
            .as_ref()
            .ok_or_else(|| Error::Config("TLS key file not specified".to_string()))?;

        let cert_chain = load_certificates(cert_file)?;
        let private_key = load_private_key(key_file)?;

        let tls_config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)?;

        self.tls_acceptor = Some(TlsAcceptor::from(Arc::new(tls_config)));

        tracing::info!("TLS configuration loaded");
        Ok(())
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn start(&self) -> Result<()> {
        let addr = self.config.listen_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    ///
    /// Returns only when accepting fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!(
            "Listening on {} (TLS: {})",
            listener.local_addr()?,
            self.tls_acceptor.is_some()
        );

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("Error accepting connection: {}", e);
                    return Err(e.into());
                }
            };
            tracing::info!("Client connection from {}", addr);
            tokio::spawn(handle_connection(
                self.shared.clone(),
                stream,
                addr,
                self.tls_acceptor.clone(),
            ));
        }
    }

    /// Get the server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Live sessions
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.shared.registry.clone()
    }
}

async fn handle_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
) {
    let stream: Box<dyn ConnectionStream> = match tls_acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => Box::new(tls),
            Err(e) => {
                tracing::warn!("TLS handshake with {} failed: {}", addr, e);
                return;
            }
        },
        None => Box::new(stream),
    };

    let (connection, lines) = ClientConnection::new(addr, shared.send_queue);
    let (read_half, write_half) = stream.split();
    let writer = tokio::spawn(write_lines(
        connection.id,
        write_half,
        lines,
        connection.closing.clone(),
    ));

    read_lines(&shared, &connection, read_half).await;

    if let Some(session) = shared.registry.remove(&connection.id) {
        session.close();
    }
    connection.close();
    let _ = writer.await;
    tracing::info!("Client {} disconnected", addr);
}

async fn read_lines(shared: &Shared, connection: &ClientConnection, read_half: Box<dyn ConnectionReadHalf>) {
    let mut reader = AsyncBufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = connection.closing.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                handle_line(shared, connection, &line).await;
            }
            Err(e) => {
                tracing::warn!("Error reading from client {}: {}", connection.remote_addr, e);
                break;
            }
        }
    }
}

async fn handle_line(shared: &Shared, connection: &ClientConnection, line: &str) {
    tracing::debug!("{} -> {:?}", connection.remote_addr, redact(line));

    let command = match ParsedCommand::parse(line) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!("Discarding line from {}: {}", connection.remote_addr, e);
            return;
        }
    };
    if !shared.dispatcher.supports(&command.command) {
        tracing::warn!("Unknown command {} from {}", command.command, connection.remote_addr);
        return;
    }

    let (session, created) = shared.registry.get_or_create(connection.id, || {
        Session::start(connection, shared.settings.clone(), shared.connector.clone())
    });
    if created {
        tracing::info!("New session {} for {}", session.id, connection.remote_addr);
    }

    if let Err(e) = shared.dispatcher.dispatch(&session, &command).await {
        tracing::warn!("{} from {} failed: {}", command.command, connection.remote_addr, e);
    }
}

/// Keep credentials out of the logs
fn redact(line: &str) -> &str {
    if line.starts_with("PASS ") {
        "PASS *****"
    } else {
        line.trim_end()
    }
}

/// Load certificates from file
fn load_certificates(filename: &str) -> Result<Vec<Certificate>> {
    let certfile = std::fs::File::open(filename)
        .map_err(|e| Error::Config(format!("Failed to open certificate file: {}", e)))?;
    let mut reader = BufReader::new(certfile);

    let certs = rustls_pemfile::certs(&mut reader)
        .map_err(|e| Error::Config(format!("Failed to parse certificate file: {}", e)))?;

    Ok(certs.into_iter().map(Certificate).collect())
}

/// Load private key from file
fn load_private_key(filename: &str) -> Result<PrivateKey> {
    let keyfile = std::fs::File::open(filename)
        .map_err(|e| Error::Config(format!("Failed to open key file: {}", e)))?;
    let mut reader = BufReader::new(keyfile);

    let keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|e| Error::Config(format!("Failed to parse key file: {}", e)))?;

    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| Error::Config("No private keys found in file".to_string()))
}
