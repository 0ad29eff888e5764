//! slackircd core
//!
//! An IRC server front end for a team-chat workspace. IRC clients connect to
//! the gateway, which logs into the workspace on their behalf, presents its
//! conversations as IRC channels and relays traffic both ways.

pub mod bridge;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod numeric;
pub mod registry;
pub mod remote;
pub mod server;
pub mod session;
pub mod text;

pub use commands::{CommandHandler, Dispatcher};
pub use config::Config;
pub use connection::ClientConnection;
pub use error::{Error, Result};
pub use message::ParsedCommand;
pub use numeric::NumericReply;
pub use registry::SessionRegistry;
pub use remote::{
    Conversation, ConversationKind, MessageTarget, RemoteEvent, RemoteLink, RemoteUser, SessionInfo, Team,
    Workspace, WorkspaceConnector,
};
pub use server::Server;
pub use session::{BridgeSettings, Channel, Session, SessionState};
pub use text::expand_text;

/// Re-exports for convenience
pub use async_trait::async_trait;
