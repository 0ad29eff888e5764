//! Workspace API abstraction
//!
//! The bridge only talks to the workspace through [`Workspace`] (request /
//! response calls) and [`WorkspaceConnector`] (creating a logged-in client
//! together with its real-time event feed).

pub mod pager;
pub mod slack;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub use pager::fetch_all;

/// Kind of a workspace conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationKind {
    /// Public channel
    Public,
    /// Private channel or multi-party direct conversation
    Group,
    /// One-to-one direct conversation
    Direct,
}

/// A workspace conversation as returned by listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub topic: String,
    pub kind: ConversationKind,
    /// Whether the logged-in account belongs to it
    pub is_member: bool,
}

impl Conversation {
    /// Whether IRC should flag this as a group rather than a public channel
    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }
}

/// A workspace user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: String,
    /// Handle, used as the IRC nickname
    pub name: String,
    pub real_name: String,
}

/// The workspace team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
}

/// Identity of the logged-in account, available once the feed is ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub user: RemoteUser,
    pub team: Team,
}

/// Cursor and size of one page request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Empty for the first page
    pub cursor: String,
    pub limit: usize,
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Empty on the last page
    pub next_cursor: String,
}

impl<T> Page<T> {
    /// A page with no successor
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: String::new(),
        }
    }
}

/// Destination of an outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageTarget {
    /// Conversation name without the leading `#`
    Channel(String),
    /// User name of a direct message recipient
    Direct(String),
}

impl MessageTarget {
    /// Map an IRC PRIVMSG target
    pub fn from_irc(target: &str) -> Self {
        match target.strip_prefix('#') {
            Some(name) => MessageTarget::Channel(name.to_string()),
            None => MessageTarget::Direct(target.to_string()),
        }
    }
}

impl fmt::Display for MessageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageTarget::Channel(name) => write!(f, "#{}", name),
            MessageTarget::Direct(name) => write!(f, "@{}", name),
        }
    }
}

/// Outcome of leaving a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    /// The account was not a member to begin with
    NotInChannel,
}

/// Real-time events relayed to the IRC client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// A message was posted
    Message {
        channel: String,
        user: String,
        text: String,
    },
    /// A conversation topic changed
    TopicChanged {
        channel: String,
        user: String,
        topic: String,
    },
    /// Someone joined a conversation
    MemberJoined { channel: String, user: String },
    /// Someone left a conversation
    MemberLeft { channel: String, user: String },
    /// The logged-in account was added to a conversation
    Joined(Conversation),
    /// The logged-in account left a conversation
    Left { channel: String },
}

/// Request/response side of the workspace API
#[async_trait]
pub trait Workspace: Send + Sync {
    /// One page of the conversations visible to the account
    async fn conversations(&self, page: PageRequest) -> Result<Page<Conversation>>;

    /// One page of a conversation's member IDs
    async fn conversation_members(&self, conversation_id: &str, page: PageRequest) -> Result<Page<String>>;

    /// Look up a single conversation
    async fn conversation_info(&self, conversation_id: &str) -> Result<Conversation>;

    /// Every channel in the workspace, in one call
    async fn channels(&self) -> Result<Vec<Conversation>>;

    /// One page of workspace users
    async fn users(&self, page: PageRequest) -> Result<Page<RemoteUser>>;

    /// Look up a single user
    async fn user_info(&self, user_id: &str) -> Result<RemoteUser>;

    /// Post a message as the logged-in account
    async fn post_message(&self, target: &MessageTarget, text: &str) -> Result<()>;

    /// Join a conversation by name
    async fn join_conversation(&self, name: &str) -> Result<Conversation>;

    /// Leave a conversation by ID
    async fn leave_conversation(&self, conversation_id: &str) -> Result<LeaveOutcome>;
}

/// A freshly created workspace client.
///
/// `ready` fires once with the session info when the real-time feed is up;
/// it is dropped without a value if the feed cannot be established.
pub struct RemoteLink {
    pub workspace: Arc<dyn Workspace>,
    pub ready: oneshot::Receiver<SessionInfo>,
    pub events: mpsc::Receiver<RemoteEvent>,
    /// Background task managing the feed connection
    pub task: JoinHandle<()>,
}

/// Creates workspace clients from an API credential
pub trait WorkspaceConnector: Send + Sync {
    /// Create a client and start its connection-management task
    fn connect(&self, api_key: &str) -> Result<RemoteLink>;
}
