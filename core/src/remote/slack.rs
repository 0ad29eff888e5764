//! Slack implementation of the workspace API
//!
//! Request/response calls go to the Web API over HTTPS with bearer
//! authentication. The real-time feed is the websocket handed out by
//! `rtm.connect`, owned by a background task that reconnects when the socket
//! drops and stops once nobody listens to its events anymore.

use super::{
    Conversation, ConversationKind, LeaveOutcome, MessageTarget, Page, PageRequest, RemoteEvent,
    RemoteLink, RemoteUser, SessionInfo, Team, Workspace, WorkspaceConnector,
};
use crate::config::WorkspaceConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

/// Delay before the feed reconnects after losing its socket
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Events buffered between the feed task and the relay
const EVENT_QUEUE: usize = 1024;
const CONVERSATION_TYPES: &str = "public_channel,private_channel,mpim";

/// Creates Slack clients
pub struct SlackConnector {
    api_url: Url,
    http: reqwest::Client,
}

impl SlackConnector {
    /// Create a connector from the workspace configuration
    pub fn new(config: &WorkspaceConfig) -> Result<Self> {
        let api_url = Url::parse(&config.api_url)
            .map_err(|e| Error::Config(format!("Invalid API URL {}: {}", config.api_url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("slackircd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { api_url, http })
    }
}

impl WorkspaceConnector for SlackConnector {
    fn connect(&self, api_key: &str) -> Result<RemoteLink> {
        if api_key.is_empty() {
            return Err(Error::Auth("No API key provided".to_string()));
        }
        let workspace = Arc::new(SlackWorkspace {
            http: self.http.clone(),
            api_url: self.api_url.clone(),
            token: api_key.to_string(),
        });
        let (ready_tx, ready_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let task = tokio::spawn(manage_connection(workspace.clone(), ready_tx, events_tx));

        Ok(RemoteLink {
            workspace,
            ready: ready_rx,
            events: events_rx,
            task,
        })
    }
}

/// Web API client bound to one credential
pub struct SlackWorkspace {
    http: reqwest::Client,
    api_url: Url,
    token: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Default, Deserialize)]
struct SlackTopic {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct SlackChannel {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    topic: Option<SlackTopic>,
    #[serde(default)]
    is_member: bool,
    #[serde(default)]
    is_im: bool,
    #[serde(default)]
    is_mpim: bool,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    user: Option<String>,
}

impl From<SlackChannel> for Conversation {
    fn from(ch: SlackChannel) -> Self {
        let kind = if ch.is_im {
            ConversationKind::Direct
        } else if ch.is_mpim || ch.is_private {
            ConversationKind::Group
        } else {
            ConversationKind::Public
        };
        let name = match (ch.name.is_empty(), ch.user) {
            (true, Some(user)) => user,
            _ => ch.name,
        };
        Conversation {
            id: ch.id,
            name,
            topic: ch.topic.map(|t| t.value).unwrap_or_default(),
            kind,
            is_member: ch.is_member || ch.is_im,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    real_name: String,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<SlackProfile>,
}

impl From<SlackUser> for RemoteUser {
    fn from(user: SlackUser) -> Self {
        let real_name = user
            .real_name
            .filter(|n| !n.is_empty())
            .or_else(|| user.profile.map(|p| p.real_name))
            .unwrap_or_default();
        RemoteUser {
            id: user.id,
            name: user.name,
            real_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConversationsPage {
    #[serde(default)]
    channels: Vec<SlackChannel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct MembersPage {
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    members: Vec<SlackUser>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct ChannelEnvelope {
    channel: SlackChannel,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct LeaveResponse {
    #[serde(default)]
    not_in_channel: bool,
}

#[derive(Debug, Deserialize)]
struct RtmIdentity {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RtmConnect {
    url: String,
    #[serde(rename = "self")]
    me: RtmIdentity,
    team: RtmIdentity,
}

impl SlackWorkspace {
    fn endpoint(&self, method: &str) -> Result<Url> {
        self.api_url
            .join(method)
            .map_err(|e| Error::Config(format!("Invalid API method {}: {}", method, e)))
    }

    async fn get<T: DeserializeOwned>(&self, method: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .http
            .get(self.endpoint(method)?)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        decode_response(method, response).await
    }

    async fn post<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let response = self
            .http
            .post(self.endpoint(method)?)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        decode_response(method, response).await
    }

    /// Open a feed session, returning its websocket URL and the account identity
    async fn rtm_connect(&self) -> Result<(String, SessionInfo)> {
        let connect: RtmConnect = self.get("rtm.connect", &[]).await?;
        let user = match self.user_info(&connect.me.id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::debug!("Cannot look up own user {}: {}", connect.me.id, e);
                RemoteUser {
                    id: connect.me.id.clone(),
                    name: connect.me.name.clone(),
                    real_name: connect.me.name.clone(),
                }
            }
        };
        let info = SessionInfo {
            user,
            team: Team {
                id: connect.team.id,
                name: connect.team.name,
            },
        };
        Ok((connect.url, info))
    }
}

async fn decode_response<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
    if response.status() == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(1);
        return Err(Error::RateLimited {
            retry_after: Duration::from_secs(retry_after),
        });
    }

    let body: Value = response.error_for_status()?.json().await?;
    if body.get("ok").and_then(Value::as_bool) != Some(true) {
        let code = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        if code == "ratelimited" {
            return Err(Error::RateLimited {
                retry_after: Duration::from_secs(1),
            });
        }
        return Err(Error::Remote(format!("{}: {}", method, code)));
    }
    Ok(serde_json::from_value(body)?)
}

fn page_query(page: &PageRequest) -> Vec<(&'static str, String)> {
    let mut query = vec![("limit", page.limit.to_string())];
    if !page.cursor.is_empty() {
        query.push(("cursor", page.cursor.clone()));
    }
    query
}

#[async_trait]
impl Workspace for SlackWorkspace {
    async fn conversations(&self, page: PageRequest) -> Result<Page<Conversation>> {
        let mut query = page_query(&page);
        query.push(("types", CONVERSATION_TYPES.to_string()));
        query.push(("exclude_archived", "true".to_string()));
        let result: ConversationsPage = self.get("conversations.list", &query).await?;
        Ok(Page {
            items: result.channels.into_iter().map(Conversation::from).collect(),
            next_cursor: result.response_metadata.next_cursor,
        })
    }

    async fn conversation_members(&self, conversation_id: &str, page: PageRequest) -> Result<Page<String>> {
        let mut query = page_query(&page);
        query.push(("channel", conversation_id.to_string()));
        let result: MembersPage = self.get("conversations.members", &query).await?;
        Ok(Page {
            items: result.members,
            next_cursor: result.response_metadata.next_cursor,
        })
    }

    async fn conversation_info(&self, conversation_id: &str) -> Result<Conversation> {
        let result: ChannelEnvelope = self
            .get("conversations.info", &[("channel", conversation_id.to_string())])
            .await?;
        Ok(result.channel.into())
    }

    async fn channels(&self) -> Result<Vec<Conversation>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let page = self
                .conversations(PageRequest {
                    cursor: cursor.clone(),
                    limit: 1000,
                })
                .await?;
            channels.extend(page.items);
            if page.next_cursor.is_empty() {
                return Ok(channels);
            }
            cursor = page.next_cursor;
        }
    }

    async fn users(&self, page: PageRequest) -> Result<Page<RemoteUser>> {
        let result: UsersPage = self.get("users.list", &page_query(&page)).await?;
        Ok(Page {
            items: result.members.into_iter().map(RemoteUser::from).collect(),
            next_cursor: result.response_metadata.next_cursor,
        })
    }

    async fn user_info(&self, user_id: &str) -> Result<RemoteUser> {
        let result: UserEnvelope = self.get("users.info", &[("user", user_id.to_string())]).await?;
        Ok(result.user.into())
    }

    async fn post_message(&self, target: &MessageTarget, text: &str) -> Result<()> {
        let body = json!({
            "channel": target.to_string(),
            "text": text,
            "as_user": true,
        });
        let _: Value = self.post("chat.postMessage", body).await?;
        Ok(())
    }

    async fn join_conversation(&self, name: &str) -> Result<Conversation> {
        let channels = self.channels().await?;
        let id = channels
            .into_iter()
            .find(|ch| ch.name == name)
            .map(|ch| ch.id)
            .ok_or_else(|| Error::Remote(format!("conversations.join: channel_not_found ({})", name)))?;
        let result: ChannelEnvelope = self
            .post("conversations.join", json!({ "channel": id }))
            .await?;
        Ok(result.channel.into())
    }

    async fn leave_conversation(&self, conversation_id: &str) -> Result<LeaveOutcome> {
        let result: LeaveResponse = self
            .post("conversations.leave", json!({ "channel": conversation_id }))
            .await?;
        Ok(if result.not_in_channel {
            LeaveOutcome::NotInChannel
        } else {
            LeaveOutcome::Left
        })
    }
}

/// Keep the real-time feed connected and forward its events.
///
/// Failing before the first successful connection drops `ready` without a
/// value, which the bridge reports as a connect failure.
async fn manage_connection(
    workspace: Arc<SlackWorkspace>,
    ready: oneshot::Sender<SessionInfo>,
    events: mpsc::Sender<RemoteEvent>,
) {
    let mut ready = Some(ready);
    loop {
        let connected = match workspace.rtm_connect().await {
            Ok((url, info)) => tokio_tungstenite::connect_async(url.as_str())
                .await
                .map(|(socket, _)| (socket, info))
                .map_err(Error::from),
            Err(e) => Err(e),
        };

        let (mut socket, info) = match connected {
            Ok(connected) => connected,
            Err(Error::RateLimited { retry_after }) => {
                tracing::warn!("Real-time connect rate limited, waiting {:?}", retry_after);
                tokio::time::sleep(retry_after).await;
                continue;
            }
            Err(e) if ready.is_some() || is_auth_failure(&e) => {
                tracing::error!("Cannot connect to the real-time feed: {}", e);
                return;
            }
            Err(e) => {
                tracing::warn!("Real-time reconnect failed: {}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        tracing::info!("Real-time feed connected as {} on team {}", info.user.name, info.team.name);
        if let Some(ready) = ready.take() {
            if ready.send(info).is_err() {
                return;
            }
        }

        loop {
            let frame = tokio::select! {
                frame = socket.next() => frame,
                _ = events.closed() => return,
            };
            match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(event) = decode_event(&text) {
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    tracing::info!("Real-time feed closed by the server: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Real-time feed error: {}", e);
                    break;
                }
                None => break,
            }
        }

        if events.is_closed() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Errors no reconnect can fix
fn is_auth_failure(error: &Error) -> bool {
    const FATAL: [&str; 4] = ["invalid_auth", "not_authed", "account_inactive", "token_revoked"];
    match error {
        Error::Remote(code) => FATAL.iter().any(|fatal| code.ends_with(fatal)),
        _ => false,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Translate one feed frame into an event the bridge understands
fn decode_event(raw: &str) -> Option<RemoteEvent> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Ignoring undecodable feed frame: {}", e);
            return None;
        }
    };
    let kind = value.get("type").and_then(Value::as_str)?;

    let event = match kind {
        "message" => {
            let channel = str_field(&value, "channel")?;
            match value.get("subtype").and_then(Value::as_str) {
                None | Some("me_message") | Some("thread_broadcast") | Some("file_share") => {
                    RemoteEvent::Message {
                        channel,
                        user: str_field(&value, "user")?,
                        text: str_field(&value, "text").unwrap_or_default(),
                    }
                }
                Some("bot_message") => RemoteEvent::Message {
                    channel,
                    user: str_field(&value, "username")
                        .or_else(|| str_field(&value, "bot_id"))?,
                    text: str_field(&value, "text").unwrap_or_default(),
                },
                Some("channel_topic") | Some("group_topic") => RemoteEvent::TopicChanged {
                    channel,
                    user: str_field(&value, "user").unwrap_or_default(),
                    topic: str_field(&value, "topic").unwrap_or_default(),
                },
                Some(other) => {
                    tracing::debug!("Ignoring message subtype {}", other);
                    return None;
                }
            }
        }
        "member_joined_channel" => RemoteEvent::MemberJoined {
            channel: str_field(&value, "channel")?,
            user: str_field(&value, "user")?,
        },
        "member_left_channel" => RemoteEvent::MemberLeft {
            channel: str_field(&value, "channel")?,
            user: str_field(&value, "user")?,
        },
        "channel_joined" | "group_joined" => {
            let channel: SlackChannel = serde_json::from_value(value.get("channel")?.clone()).ok()?;
            let mut conversation = Conversation::from(channel);
            conversation.is_member = true;
            RemoteEvent::Joined(conversation)
        }
        "channel_left" | "group_left" => RemoteEvent::Left {
            channel: str_field(&value, "channel")?,
        },
        other => {
            tracing::trace!("Ignoring feed event {}", other);
            return None;
        }
    };
    Some(event)
}
