//! Remote bridge
//!
//! Drives the workspace on behalf of a session: the connect sequence with its
//! welcome burst, the bulk join of every conversation the account belongs to,
//! the outgoing post queue and the relay of real-time events back into IRC
//! lines.

use crate::message::{command_line, user_mask};
use crate::remote::{fetch_all, Conversation, ConversationKind, RemoteEvent, SessionInfo};
use crate::session::{Channel, Post, Session, SessionState};
use crate::text::expand_text_with;
use crate::{Error, NumericReply, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connect the session to the workspace unless that already happened.
///
/// Concurrent callers wait for the first attempt instead of starting a second
/// client.
pub async fn ensure_connected(session: &Arc<Session>) -> Result<()> {
    let _guard = session.connect_lock().lock().await;
    if session.is_connected() {
        return Ok(());
    }
    connect(session).await
}

/// Run the connect sequence: create the client, wait for the feed to be
/// ready, greet the user, bulk join and start relaying events.
pub async fn connect(session: &Arc<Session>) -> Result<()> {
    let api_key = session
        .api_key()
        .ok_or_else(|| Error::Auth("No API key provided, send PASS first".to_string()))?;

    tracing::info!("Starting workspace client for {}", session.remote_addr);
    let link = session.connector().connect(&api_key)?;
    session.push_task(link.task);
    session.set_state(SessionState::Connecting);

    let timeout = session.settings().connect_timeout;
    let info = match tokio::time::timeout(timeout, link.ready).await {
        Ok(Ok(info)) => info,
        Ok(Err(_)) => {
            return Err(Error::Connection(
                "Workspace connection failed before becoming ready".to_string(),
            ))
        }
        Err(_) => return Err(Error::ConnectTimeout(timeout)),
    };

    tracing::info!(
        "Logged in to team {} ({}) as {} ({})",
        info.team.name,
        info.team.id,
        info.user.name,
        info.user.id
    );
    session.attach_workspace(link.workspace);
    session.set_nick(&info.user.name);
    session.cache_user(info.user.clone());
    session.set_session_info(info.clone());
    session.set_state(SessionState::Registered);

    send_welcome(session, &info).await?;

    session.clear_channels();
    prefetch_users(session).await;
    if let Err(e) = bulk_join(session).await {
        tracing::error!("Bulk join failed for {}: {}", session.nick(), e);
    }
    session.set_state(SessionState::Active);

    let relay = tokio::spawn(relay_events(session.clone(), link.events));
    session.push_task(relay);
    Ok(())
}

async fn send_welcome(session: &Session, info: &SessionInfo) -> Result<()> {
    let nick = session.nick();
    let welcome = format!(
        "Welcome to the {} IRC chat, {}!",
        session.server_name(),
        nick
    );
    session
        .send_numeric(NumericReply::RplWelcome, &nick, &welcome)
        .await?;
    session
        .send_numeric(NumericReply::RplMotdStart, &nick, "")
        .await?;
    for line in &session.settings().motd {
        session.send_numeric(NumericReply::RplMotd, &nick, line).await?;
    }
    session
        .send_numeric(
            NumericReply::RplMotd,
            &nick,
            &format!("Workspace team: {}", info.team.name),
        )
        .await?;
    session
        .send_numeric(NumericReply::RplEndOfMotd, &nick, "")
        .await
}

/// Fill the user cache; a failure only degrades name resolution
async fn prefetch_users(session: &Session) {
    let Some(workspace) = session.workspace() else {
        return;
    };
    let workspace = &*workspace;
    let settings = session.settings();
    match fetch_all("users", settings.page_size, settings.max_attempts, move |page| {
        workspace.users(page)
    })
    .await
    {
        Ok(users) => {
            tracing::debug!("Cached {} workspace users", users.len());
            for user in users {
                session.cache_user(user);
            }
        }
        Err(e) => tracing::warn!("Cannot prefetch workspace users: {}", e),
    }
}

/// Member IDs of a conversation, all pages
pub async fn fetch_members(session: &Session, conversation_id: &str) -> Result<Vec<String>> {
    let workspace = session.require_workspace()?;
    let workspace = &*workspace;
    let settings = session.settings();
    fetch_all(
        "conversation members",
        settings.page_size,
        settings.max_attempts,
        move |page| workspace.conversation_members(conversation_id, page),
    )
    .await
}

/// Announce every conversation the account already belongs to
pub async fn bulk_join(session: &Session) -> Result<()> {
    let workspace = session.require_workspace()?;
    let workspace = &*workspace;
    let settings = session.settings();
    let conversations = fetch_all(
        "conversations",
        settings.page_size,
        settings.max_attempts,
        move |page| workspace.conversations(page),
    )
    .await?;

    tracing::info!(
        "Workspace lists {} conversations for {}",
        conversations.len(),
        session.nick()
    );
    for conversation in &conversations {
        session.cache_conversation(conversation.clone());
    }

    for conversation in conversations.iter().filter(|c| c.is_member) {
        let members = fetch_members(session, &conversation.id).await?;
        announce_join(session, conversation, members, false).await?;
    }
    Ok(())
}

/// Send the post-join sequence for a conversation and record the channel.
///
/// With `explicit` the sequence is sent even when the channel is already
/// known, as for a client rejoining a channel.
pub async fn announce_join(
    session: &Session,
    conversation: &Conversation,
    members: Vec<String>,
    explicit: bool,
) -> Result<()> {
    let name = &conversation.name;
    tracing::debug!(
        "Joined #{} topic={:?} members={} explicit={}",
        name,
        conversation.topic,
        members.len(),
        explicit
    );

    let mut names = Vec::with_capacity(members.len());
    for member in &members {
        names.push(user_name(session, member).await);
    }

    let topic = expand_text_with(&conversation.topic, |id| session.cached_user(id).map(|u| u.name));
    let channel = Channel {
        id: conversation.id.clone(),
        name: name.clone(),
        topic: topic.clone(),
        members,
        is_group: conversation.is_group(),
    };
    if !session.insert_channel(channel) && !explicit {
        return Ok(());
    }

    let nick = session.nick();
    session
        .send_line(command_line(&session.mask(), "JOIN", &format!("#{}", name)))
        .await?;
    session
        .send_numeric(
            NumericReply::RplTopic,
            &format!("{} #{}", nick, name),
            &topic,
        )
        .await?;
    session
        .send_numeric(
            NumericReply::RplNameReply,
            &format!("{} = #{}", nick, name),
            &names.join(" "),
        )
        .await?;
    session
        .send_numeric(
            NumericReply::RplEndOfNames,
            &format!("{} #{}", nick, name),
            "End of NAMES list",
        )
        .await
}

/// Handle of a workspace user: cache, then a lookup, then the raw ID
pub async fn user_name(session: &Session, user_id: &str) -> String {
    if let Some(user) = session.cached_user(user_id) {
        return user.name;
    }
    let Some(workspace) = session.workspace() else {
        return user_id.to_string();
    };
    match workspace.user_info(user_id).await {
        Ok(user) => {
            let name = user.name.clone();
            session.cache_user(user);
            name
        }
        Err(e) => {
            tracing::debug!("Cannot look up user {}: {}", user_id, e);
            user_id.to_string()
        }
    }
}

async fn lookup_conversation(session: &Session, conversation_id: &str) -> Result<Conversation> {
    if let Some(conversation) = session.cached_conversation(conversation_id) {
        return Ok(conversation);
    }
    let conversation = session
        .require_workspace()?
        .conversation_info(conversation_id)
        .await?;
    session.cache_conversation(conversation.clone());
    Ok(conversation)
}

async fn remote_mask(session: &Session, user_id: &str) -> String {
    let name = user_name(session, user_id).await;
    user_mask(&name, user_id, session.server_name())
}

/// Split a message body into lines of at most `chunk_size` bytes.
///
/// Splits happen on line breaks first (CR, LF or both), then on character
/// boundaries. Empty lines are dropped.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    for line in text.split(|c: char| c == '\r' || c == '\n') {
        let mut current = String::new();
        for ch in line.chars() {
            if !current.is_empty() && current.len() + ch.len_utf8() > chunk_size {
                chunks.push(std::mem::take(&mut current));
            }
            current.push(ch);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
    }
    chunks
}

/// Post queued messages in order until the session closes
pub(crate) async fn drain_posts(session: Arc<Session>, mut posts: mpsc::Receiver<Post>) {
    let closing = session.closing();
    loop {
        let post = tokio::select! {
            _ = closing.cancelled() => break,
            post = posts.recv() => post,
        };
        let Some(post) = post else { break };

        let Some(workspace) = session.workspace() else {
            tracing::warn!(
                "Not connected to the workspace, dropping message to {}",
                post.target
            );
            continue;
        };
        if let Err(e) = workspace.post_message(&post.target, &post.text).await {
            tracing::warn!("Cannot post message to {}: {}", post.target, e);
        }
    }
}

/// Relay workspace events until the session closes or the feed ends
async fn relay_events(session: Arc<Session>, mut events: mpsc::Receiver<RemoteEvent>) {
    let closing = session.closing();
    loop {
        let event = tokio::select! {
            _ = closing.cancelled() => return,
            event = events.recv() => event,
        };
        let Some(event) = event else { break };
        if let Err(e) = relay_event(&session, event).await {
            if session.is_closed() {
                return;
            }
            tracing::warn!("Cannot relay event to {}: {}", session.id, e);
        }
    }

    tracing::warn!("Workspace feed for {} ended", session.nick());
    session.close_with_error("Workspace connection lost").await;
}

/// Translate one event into IRC lines
pub async fn relay_event(session: &Session, event: RemoteEvent) -> Result<()> {
    let own_id = session.own_user_id().unwrap_or_default();
    match event {
        RemoteEvent::Message { channel, user, text } => {
            let conversation = lookup_conversation(session, &channel).await?;
            let target = match conversation.kind {
                ConversationKind::Direct => session.nick(),
                // The client already echoed its own channel messages
                _ if user == own_id => return Ok(()),
                _ => format!("#{}", conversation.name),
            };
            let source = remote_mask(session, &user).await;
            let text = expand_text_with(&text, |id| session.cached_user(id).map(|u| u.name));
            for chunk in chunk_text(&text, session.settings().chunk_size) {
                session
                    .send_line(command_line(
                        &source,
                        "PRIVMSG",
                        &format!("{} :{}", target, chunk),
                    ))
                    .await?;
            }
        }
        RemoteEvent::TopicChanged { channel, user, topic } => {
            let conversation = lookup_conversation(session, &channel).await?;
            let topic = expand_text_with(&topic, |id| session.cached_user(id).map(|u| u.name));
            session.update_channel(&channel, |c| c.topic = topic.clone());
            let source = if user.is_empty() {
                session.server_name().to_string()
            } else {
                remote_mask(session, &user).await
            };
            session
                .send_line(command_line(
                    &source,
                    "TOPIC",
                    &format!("#{} :{}", conversation.name, topic),
                ))
                .await?;
        }
        RemoteEvent::MemberJoined { channel, user } => {
            if user == own_id {
                return Ok(());
            }
            let Some(joined) = session.channel_by_id(&channel) else {
                return Ok(());
            };
            session.update_channel(&channel, |c| {
                if !c.members.contains(&user) {
                    c.members.push(user.clone());
                }
            });
            let source = remote_mask(session, &user).await;
            session
                .send_line(command_line(&source, "JOIN", &format!("#{}", joined.name)))
                .await?;
        }
        RemoteEvent::MemberLeft { channel, user } => {
            if user == own_id {
                return Ok(());
            }
            let Some(left) = session.channel_by_id(&channel) else {
                return Ok(());
            };
            session.update_channel(&channel, |c| c.members.retain(|m| m != &user));
            let source = remote_mask(session, &user).await;
            session
                .send_line(command_line(&source, "PART", &format!("#{}", left.name)))
                .await?;
        }
        RemoteEvent::Joined(conversation) => {
            session.cache_conversation(conversation.clone());
            let members = fetch_members(session, &conversation.id).await?;
            announce_join(session, &conversation, members, false).await?;
        }
        RemoteEvent::Left { channel } => {
            let Some(left) = session.channel_by_id(&channel) else {
                return Ok(());
            };
            session.remove_channel(&left.name);
            session
                .send_line(command_line(&session.mask(), "PART", &format!("#{}", left.name)))
                .await?;
        }
    }
    Ok(())
}
