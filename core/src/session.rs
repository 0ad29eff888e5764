//! Per-connection session state
//!
//! A [`Session`] is created on the first command read from a connection and
//! lives until that connection goes away. It owns everything the command
//! handlers and the bridge need: the IRC identity, the joined channels, the
//! workspace client once connected and the caches that resolve workspace IDs
//! into names.

use crate::config::Config;
use crate::connection::{ClientConnection, Outbound};
use crate::message::user_mask;
use crate::remote::{Conversation, MessageTarget, RemoteUser, SessionInfo, Workspace, WorkspaceConnector};
use crate::text::single_line;
use crate::{Error, NumericReply, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Messages waiting to be posted to the workspace
const POST_QUEUE: usize = 64;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No workspace connection yet
    Unauthenticated,
    /// Waiting for the real-time feed to become ready
    Connecting,
    /// Logged in, bulk join in progress
    Registered,
    /// Fully set up, events are relayed
    Active,
    /// Connection closed or fatal workspace error
    Closed,
}

/// A joined workspace conversation as seen from IRC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Workspace conversation ID
    pub id: String,
    /// Name without the leading `#`
    pub name: String,
    pub topic: String,
    /// Member user IDs
    pub members: Vec<String>,
    /// Private channel or multi-party conversation
    pub is_group: bool,
}

/// Settings shared by every session of a server
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub server_name: String,
    /// Static credential used when the client sends no PASS
    pub api_key: Option<String>,
    pub page_size: usize,
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    pub motd: Vec<String>,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            server_name: config.server.name.clone(),
            api_key: config.workspace.api_key.clone().filter(|k| !k.is_empty()),
            page_size: config.workspace.pagination,
            chunk_size: config.workspace.chunk_size,
            connect_timeout: config.workspace.connect_timeout(),
            max_attempts: config.workspace.max_api_attempts,
            motd: config.server.motd.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Identity {
    api_key: Option<String>,
    nick: String,
    username: String,
    realname: String,
}

/// One outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub target: MessageTarget,
    pub text: String,
}

/// State of one IRC connection bridged to the workspace
pub struct Session {
    /// Connection identity
    pub id: Uuid,
    pub remote_addr: SocketAddr,
    settings: Arc<BridgeSettings>,
    connector: Arc<dyn WorkspaceConnector>,
    outbound: Outbound,
    closing: CancellationToken,
    state: RwLock<SessionState>,
    identity: RwLock<Identity>,
    /// Joined channels keyed by name
    channels: Mutex<HashMap<String, Channel>>,
    workspace: RwLock<Option<Arc<dyn Workspace>>>,
    info: RwLock<Option<SessionInfo>>,
    conversations: DashMap<String, Conversation>,
    users: DashMap<String, RemoteUser>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    posts: mpsc::Sender<Post>,
    /// Serializes workspace connection attempts
    connect_lock: tokio::sync::Mutex<()>,
}

impl Session {
    /// Create the session for a connection and start its post queue task
    pub fn start(
        connection: &ClientConnection,
        settings: Arc<BridgeSettings>,
        connector: Arc<dyn WorkspaceConnector>,
    ) -> Arc<Self> {
        let (posts, post_rx) = mpsc::channel(POST_QUEUE);
        let session = Arc::new(Self {
            id: connection.id,
            remote_addr: connection.remote_addr,
            settings,
            connector,
            outbound: connection.outbound.clone(),
            closing: connection.closing.clone(),
            state: RwLock::new(SessionState::Unauthenticated),
            identity: RwLock::new(Identity::default()),
            channels: Mutex::new(HashMap::new()),
            workspace: RwLock::new(None),
            info: RwLock::new(None),
            conversations: DashMap::new(),
            users: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            posts,
            connect_lock: tokio::sync::Mutex::new(()),
        });

        let task = tokio::spawn(crate::bridge::drain_posts(session.clone(), post_rx));
        session.push_task(task);
        tracing::debug!("Created session {} for {}", session.id, session.remote_addr);
        session
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn server_name(&self) -> &str {
        &self.settings.server_name
    }

    pub(crate) fn connector(&self) -> &Arc<dyn WorkspaceConnector> {
        &self.connector
    }

    pub(crate) fn connect_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.connect_lock
    }

    /// Queue a raw line for the client
    pub async fn send_line(&self, line: String) -> Result<()> {
        self.outbound.send(line).await
    }

    /// Queue a numeric reply for the client
    pub async fn send_numeric(&self, reply: NumericReply, target: &str, text: &str) -> Result<()> {
        self.send_line(reply.line(self.server_name(), target, text)).await
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Move to a new state; a closed session stays closed
    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        if *current != SessionState::Closed {
            tracing::debug!("Session {} state {:?} -> {:?}", self.id, *current, state);
            *current = state;
        }
    }

    /// Credential from PASS, falling back to the configured one
    pub fn api_key(&self) -> Option<String> {
        self.identity
            .read()
            .api_key
            .clone()
            .or_else(|| self.settings.api_key.clone())
    }

    pub fn set_api_key(&self, key: &str) {
        self.identity.write().api_key = Some(key.to_string());
    }

    pub fn nick(&self) -> String {
        self.identity.read().nick.clone()
    }

    /// Nickname, or `*` before one is known
    pub fn nick_or_star(&self) -> String {
        let nick = self.nick();
        if nick.is_empty() {
            "*".to_string()
        } else {
            nick
        }
    }

    pub fn set_nick(&self, nick: &str) {
        self.identity.write().nick = nick.to_string();
    }

    pub fn username(&self) -> String {
        self.identity.read().username.clone()
    }

    pub fn realname(&self) -> String {
        self.identity.read().realname.clone()
    }

    pub fn set_user(&self, username: &str, realname: &str) {
        let mut identity = self.identity.write();
        identity.username = username.to_string();
        identity.realname = realname.to_string();
    }

    /// `nick!user@server` used as the source of the session's own lines
    pub fn mask(&self) -> String {
        let identity = self.identity.read();
        let user = if identity.username.is_empty() {
            &identity.nick
        } else {
            &identity.username
        };
        user_mask(&identity.nick, user, self.server_name())
    }

    pub fn is_connected(&self) -> bool {
        self.workspace.read().is_some()
    }

    pub fn workspace(&self) -> Option<Arc<dyn Workspace>> {
        self.workspace.read().clone()
    }

    /// The workspace client, or [`Error::NotConnected`]
    pub fn require_workspace(&self) -> Result<Arc<dyn Workspace>> {
        self.workspace().ok_or(Error::NotConnected)
    }

    pub(crate) fn attach_workspace(&self, workspace: Arc<dyn Workspace>) {
        *self.workspace.write() = Some(workspace);
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.info.read().clone()
    }

    pub(crate) fn set_session_info(&self, info: SessionInfo) {
        *self.info.write() = Some(info);
    }

    /// Workspace ID of the logged-in account
    pub fn own_user_id(&self) -> Option<String> {
        self.info.read().as_ref().map(|i| i.user.id.clone())
    }

    /// Hand an outgoing message to the post queue
    pub async fn queue_post(&self, target: MessageTarget, text: String) -> Result<()> {
        self.posts
            .send(Post { target, text })
            .await
            .map_err(|_| Error::Connection("Post queue closed".to_string()))
    }

    /// Record a joined channel, returning whether it was new
    pub fn insert_channel(&self, channel: Channel) -> bool {
        self.channels
            .lock()
            .insert(channel.name.clone(), channel)
            .is_none()
    }

    pub fn remove_channel(&self, name: &str) -> Option<Channel> {
        self.channels.lock().remove(name)
    }

    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.channels.lock().get(name).cloned()
    }

    pub fn channel_by_id(&self, id: &str) -> Option<Channel> {
        self.channels.lock().values().find(|c| c.id == id).cloned()
    }

    /// Apply `f` to a joined channel, returning whether it was found
    pub fn update_channel<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Channel),
    {
        let mut channels = self.channels.lock();
        match channels.values_mut().find(|c| c.id == id) {
            Some(channel) => {
                f(channel);
                true
            }
            None => false,
        }
    }

    /// Sorted names of the joined channels
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear_channels(&self) {
        self.channels.lock().clear();
    }

    pub fn cache_conversation(&self, conversation: Conversation) {
        self.conversations.insert(conversation.id.clone(), conversation);
    }

    pub fn cached_conversation(&self, id: &str) -> Option<Conversation> {
        self.conversations.get(id).map(|c| c.clone())
    }

    pub fn cache_user(&self, user: RemoteUser) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn cached_user(&self, id: &str) -> Option<RemoteUser> {
        self.users.get(id).map(|u| u.clone())
    }

    /// Find a cached user by handle
    pub fn user_by_name(&self, name: &str) -> Option<RemoteUser> {
        self.users
            .iter()
            .find(|entry| entry.value().name == name)
            .map(|entry| entry.value().clone())
    }

    /// Track a background task so it is stopped with the session
    pub fn push_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Token cancelled when the session closes
    pub fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Close the session and its connection, stopping every background task
    pub fn close(&self) {
        self.set_state(SessionState::Closed);
        self.closing.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::debug!("Closed session {}", self.id);
    }

    /// Tell the client why the link is going down, then close
    pub async fn close_with_error(&self, reason: &str) {
        let line = format!("ERROR :Closing link: {}\r\n", single_line(reason));
        if let Err(e) = self.send_line(line).await {
            tracing::debug!("Cannot send ERROR to {}: {}", self.id, e);
        }
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .field("nick", &self.nick())
            .finish()
    }
}
