//! PRIVMSG

use super::CommandHandler;
use crate::message::ParsedCommand;
use crate::remote::MessageTarget;
use crate::session::Session;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// PRIVMSG: posts to a channel, or directly to a user when the target has
/// no `#`
pub struct PrivmsgHandler;

#[async_trait]
impl CommandHandler for PrivmsgHandler {
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        let Some(target) = command.args.first() else {
            tracing::warn!("PRIVMSG without a target from {}", session.id);
            return Ok(());
        };
        if command.args.len() != 1 {
            tracing::warn!("Invalid PRIVMSG arguments from {}: {:?}", session.id, command.args);
        }

        let target = MessageTarget::from_irc(target);
        tracing::debug!("Queueing message from {} to {}", session.nick_or_star(), target);
        session
            .queue_post(target, command.trailing().to_string())
            .await
    }
}
