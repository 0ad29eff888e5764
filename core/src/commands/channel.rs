//! JOIN and PART

use super::{channel_name, CommandHandler};
use crate::bridge;
use crate::message::{command_line, ParsedCommand};
use crate::remote::LeaveOutcome;
use crate::session::Session;
use crate::{NumericReply, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// JOIN: joins one workspace conversation
pub struct JoinHandler;

#[async_trait]
impl CommandHandler for JoinHandler {
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        if command.args.len() != 1 {
            return session
                .send_numeric(NumericReply::ErrUnknownError, &session.nick_or_star(), "Invalid JOIN command")
                .await;
        }
        let name = channel_name(&command.args[0]);

        let workspace = session.require_workspace()?;
        // A rejoin is announced again. Otherwise the relay may announce the
        // same join first, and only one of the two announcements goes out.
        let rejoin = session.channel(name).is_some();
        let conversation = match workspace.join_conversation(name).await {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::warn!("Cannot join channel {}: {}", name, e);
                return Ok(());
            }
        };
        tracing::info!("Joined channel {}", conversation.name);
        session.cache_conversation(conversation.clone());

        let announcing = session.clone();
        let task = tokio::spawn(async move {
            let result = match bridge::fetch_members(&announcing, &conversation.id).await {
                Ok(members) => bridge::announce_join(&announcing, &conversation, members, rejoin).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!("Cannot announce channel {}: {}", conversation.name, e);
            }
        });
        session.push_task(task);
        Ok(())
    }
}

/// PART: leaves one workspace conversation
pub struct PartHandler;

#[async_trait]
impl CommandHandler for PartHandler {
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        let nick = session.nick_or_star();
        if command.args.len() != 1 {
            return session
                .send_numeric(NumericReply::ErrUnknownError, &nick, "Invalid PART command")
                .await;
        }
        let name = channel_name(&command.args[0]);
        let workspace = session.require_workspace()?;

        // Leaving needs the conversation ID, only the full listing maps names to IDs
        let channels = match workspace.channels().await {
            Ok(channels) => channels,
            Err(e) => {
                tracing::warn!("Cannot leave channel {}: {}", name, e);
                return session
                    .send_numeric(
                        NumericReply::ErrUnknownError,
                        &nick,
                        &format!("Cannot leave channel: {}", e),
                    )
                    .await;
            }
        };
        let mut found = None;
        for channel in channels {
            if channel.name == name {
                found = Some(channel.id.clone());
            }
            session.cache_conversation(channel);
        }

        let not_in_channel = format!("User is not in channel {}", name);
        let Some(id) = found else {
            return session
                .send_numeric(NumericReply::ErrUserNotInChannel, &nick, &not_in_channel)
                .await;
        };

        match workspace.leave_conversation(&id).await {
            Ok(LeaveOutcome::Left) => {
                tracing::info!("Left channel {}", name);
                session.remove_channel(name);
                session
                    .send_line(command_line(&session.mask(), "PART", &format!("#{}", name)))
                    .await
            }
            Ok(LeaveOutcome::NotInChannel) => {
                session
                    .send_numeric(NumericReply::ErrUserNotInChannel, &nick, &not_in_channel)
                    .await
            }
            Err(e) => {
                tracing::warn!("Cannot leave channel {} (id: {}): {}", name, id, e);
                Ok(())
            }
        }
    }
}
