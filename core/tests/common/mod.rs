//! In-memory workspace used by the integration tests

#![allow(dead_code)]

use slackircd_core::commands::Dispatcher;
use slackircd_core::remote::{LeaveOutcome, Page, PageRequest};
use slackircd_core::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const SERVER: &str = "irc.test";

pub fn user(id: &str, name: &str, real_name: &str) -> RemoteUser {
    RemoteUser {
        id: id.to_string(),
        name: name.to_string(),
        real_name: real_name.to_string(),
    }
}

pub fn conversation(id: &str, name: &str, topic: &str, kind: ConversationKind, is_member: bool) -> Conversation {
    Conversation {
        id: id.to_string(),
        name: name.to_string(),
        topic: topic.to_string(),
        kind,
        is_member,
    }
}

fn page_of<T: Clone>(items: &[T], request: &PageRequest) -> Page<T> {
    let start: usize = request.cursor.parse().unwrap_or(0);
    let end = (start + request.limit.max(1)).min(items.len());
    let next_cursor = if end < items.len() { end.to_string() } else { String::new() };
    Page {
        items: items[start.min(end)..end].to_vec(),
        next_cursor,
    }
}

/// Canned workspace that records every write
pub struct MockWorkspace {
    pub conversations: Vec<Conversation>,
    /// Conversations only reachable through `conversation_info`
    pub hidden: Vec<Conversation>,
    pub members: HashMap<String, Vec<String>>,
    pub users: Vec<RemoteUser>,
    pub posts: Mutex<Vec<(MessageTarget, String)>>,
    pub joins: Mutex<Vec<String>>,
    pub leaves: Mutex<Vec<String>>,
    pub not_in_channel: Mutex<HashSet<String>>,
    /// Member listings that answer "rate limited" before succeeding
    pub rate_limited_members: AtomicU32,
    /// Push a `Joined` event on the feed for every successful join
    pub echo_joins: AtomicBool,
    feed: Mutex<Option<mpsc::Sender<RemoteEvent>>>,
}

impl MockWorkspace {
    /// Team with three users; alice belongs to general, random and secret
    pub fn standard() -> Self {
        let mut members = HashMap::new();
        members.insert("C1".to_string(), vec!["U1".to_string(), "U2".to_string()]);
        members.insert("C2".to_string(), vec!["U1".to_string(), "U3".to_string()]);
        members.insert("G1".to_string(), vec!["U1".to_string(), "U2".to_string(), "U3".to_string()]);
        members.insert("C4".to_string(), vec!["U2".to_string()]);

        Self {
            conversations: vec![
                conversation("C1", "general", "General chat", ConversationKind::Public, true),
                conversation("C2", "random", "Off topic", ConversationKind::Public, true),
                conversation("G1", "secret", "", ConversationKind::Group, true),
                conversation("C4", "lounge", "Sofas", ConversationKind::Public, false),
            ],
            hidden: vec![conversation("D1", "U2", "", ConversationKind::Direct, true)],
            members,
            users: vec![
                user("U1", "alice", "Alice Liddell"),
                user("U2", "bob", "Bob Builder"),
                user("U3", "carol", "Carol Danvers"),
            ],
            posts: Mutex::new(Vec::new()),
            joins: Mutex::new(Vec::new()),
            leaves: Mutex::new(Vec::new()),
            not_in_channel: Mutex::new(HashSet::new()),
            rate_limited_members: AtomicU32::new(0),
            echo_joins: AtomicBool::new(false),
            feed: Mutex::new(None),
        }
    }

    pub fn posts(&self) -> Vec<(MessageTarget, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn joins(&self) -> Vec<String> {
        self.joins.lock().unwrap().clone()
    }

    pub fn leaves(&self) -> Vec<String> {
        self.leaves.lock().unwrap().clone()
    }
}

#[async_trait]
impl Workspace for MockWorkspace {
    async fn conversations(&self, page: PageRequest) -> Result<Page<Conversation>> {
        Ok(page_of(&self.conversations, &page))
    }

    async fn conversation_members(&self, conversation_id: &str, page: PageRequest) -> Result<Page<String>> {
        let remaining = self.rate_limited_members.load(Ordering::SeqCst);
        if remaining > 0 {
            self.rate_limited_members.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::RateLimited {
                retry_after: Duration::from_millis(1),
            });
        }
        let members = self.members.get(conversation_id).cloned().unwrap_or_default();
        Ok(page_of(&members, &page))
    }

    async fn conversation_info(&self, conversation_id: &str) -> Result<Conversation> {
        self.conversations
            .iter()
            .chain(self.hidden.iter())
            .find(|c| c.id == conversation_id)
            .cloned()
            .ok_or_else(|| Error::Remote("channel_not_found".to_string()))
    }

    async fn channels(&self) -> Result<Vec<Conversation>> {
        Ok(self.conversations.clone())
    }

    async fn users(&self, page: PageRequest) -> Result<Page<RemoteUser>> {
        Ok(page_of(&self.users, &page))
    }

    async fn user_info(&self, user_id: &str) -> Result<RemoteUser> {
        self.users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| Error::Remote("user_not_found".to_string()))
    }

    async fn post_message(&self, target: &MessageTarget, text: &str) -> Result<()> {
        self.posts.lock().unwrap().push((target.clone(), text.to_string()));
        Ok(())
    }

    async fn join_conversation(&self, name: &str) -> Result<Conversation> {
        self.joins.lock().unwrap().push(name.to_string());
        let mut conversation = self
            .conversations
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| Error::Remote("channel_not_found".to_string()))?;
        conversation.is_member = true;
        if self.echo_joins.load(Ordering::SeqCst) {
            let feed = self.feed.lock().unwrap().clone();
            if let Some(feed) = feed {
                feed.send(RemoteEvent::Joined(conversation.clone())).await.unwrap();
            }
        }
        Ok(conversation)
    }

    async fn leave_conversation(&self, conversation_id: &str) -> Result<LeaveOutcome> {
        self.leaves.lock().unwrap().push(conversation_id.to_string());
        if self.not_in_channel.lock().unwrap().contains(conversation_id) {
            Ok(LeaveOutcome::NotInChannel)
        } else {
            Ok(LeaveOutcome::Left)
        }
    }
}

/// Connector handing out the mock workspace, logged in as alice
pub struct MockConnector {
    pub workspace: Arc<MockWorkspace>,
    pub info: SessionInfo,
    /// When false the feed never becomes ready
    pub ready: bool,
    /// Keep the readiness sender of a feed that is not ready, so waiting on
    /// it runs into the connect timeout
    pub stall: bool,
    stalled: Mutex<Vec<oneshot::Sender<SessionInfo>>>,
    pub api_keys: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::Sender<RemoteEvent>>>,
}

impl MockConnector {
    pub fn new(workspace: Arc<MockWorkspace>) -> Self {
        Self {
            workspace,
            info: SessionInfo {
                user: user("U1", "alice", "Alice Liddell"),
                team: Team {
                    id: "T1".to_string(),
                    name: "Wonderland".to_string(),
                },
            },
            ready: true,
            stall: false,
            stalled: Mutex::new(Vec::new()),
            api_keys: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        }
    }

    pub fn failing(workspace: Arc<MockWorkspace>) -> Self {
        Self {
            ready: false,
            ..Self::new(workspace)
        }
    }

    pub fn stalled(workspace: Arc<MockWorkspace>) -> Self {
        Self {
            ready: false,
            stall: true,
            ..Self::new(workspace)
        }
    }

    pub fn api_keys(&self) -> Vec<String> {
        self.api_keys.lock().unwrap().clone()
    }

    /// Push an event into the most recent feed
    pub async fn emit(&self, event: RemoteEvent) {
        let sender = self.events.lock().unwrap().clone().expect("no feed connected");
        sender.send(event).await.expect("feed receiver dropped");
    }

    /// Simulate the feed going away
    pub fn drop_feed(&self) {
        self.events.lock().unwrap().take();
        self.workspace.feed.lock().unwrap().take();
    }
}

impl WorkspaceConnector for MockConnector {
    fn connect(&self, api_key: &str) -> Result<RemoteLink> {
        self.api_keys.lock().unwrap().push(api_key.to_string());
        let (ready_tx, ready_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(64);
        if self.ready {
            let _ = ready_tx.send(self.info.clone());
        } else if self.stall {
            self.stalled.lock().unwrap().push(ready_tx);
        }
        *self.workspace.feed.lock().unwrap() = Some(events_tx.clone());
        *self.events.lock().unwrap() = Some(events_tx);

        Ok(RemoteLink {
            workspace: self.workspace.clone(),
            ready: ready_rx,
            events: events_rx,
            task: tokio::spawn(async {}),
        })
    }
}

pub fn test_settings() -> BridgeSettings {
    BridgeSettings {
        server_name: SERVER.to_string(),
        api_key: None,
        page_size: 2,
        chunk_size: 400,
        connect_timeout: Duration::from_secs(1),
        max_attempts: 3,
        motd: vec!["First line".to_string(), "Second line".to_string()],
    }
}

/// A session driven directly through the dispatcher
pub struct TestClient {
    pub session: Arc<Session>,
    pub connector: Arc<MockConnector>,
    pub workspace: Arc<MockWorkspace>,
    dispatcher: Dispatcher,
    lines: mpsc::Receiver<String>,
    _connection: ClientConnection,
}

impl TestClient {
    pub fn new() -> Self {
        let workspace = Arc::new(MockWorkspace::standard());
        Self::with(MockConnector::new(workspace), test_settings())
    }

    pub fn with(connector: MockConnector, settings: BridgeSettings) -> Self {
        let connector = Arc::new(connector);
        let (connection, lines) = ClientConnection::new("127.0.0.1:50000".parse().unwrap(), 256);
        let session = Session::start(
            &connection,
            Arc::new(settings),
            connector.clone() as Arc<dyn WorkspaceConnector>,
        );
        Self {
            session,
            workspace: connector.workspace.clone(),
            connector,
            dispatcher: Dispatcher::with_default_handlers(),
            lines,
            _connection: connection,
        }
    }

    /// Dispatch one raw client line
    pub async fn send(&self, line: &str) -> Result<()> {
        let command = ParsedCommand::parse(line)?;
        self.dispatcher.dispatch(&self.session, &command).await
    }

    /// PASS and NICK alice, discarding the login burst
    pub async fn login(&mut self) {
        self.send("PASS token\r\n").await.unwrap();
        self.send("NICK alice\r\n").await.unwrap();
        assert_eq!(self.session.state(), SessionState::Active);
        self.drain();
    }

    /// Next line sent to the client, terminator stripped
    pub async fn next_line(&mut self) -> String {
        let line = tokio::time::timeout(Duration::from_secs(2), self.lines.recv())
            .await
            .expect("timed out waiting for a line")
            .expect("outbound queue closed");
        line.trim_end_matches("\r\n").to_string()
    }

    /// Every line queued so far
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.lines.try_recv() {
            lines.push(line.trim_end_matches("\r\n").to_string());
        }
        lines
    }

    /// Assert nothing else arrives within a short grace period
    pub async fn assert_silent(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(100), self.lines.recv()).await;
        assert!(next.is_err(), "unexpected line {:?}", next);
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
