//! WHOIS

use super::CommandHandler;
use crate::message::ParsedCommand;
use crate::session::Session;
use crate::{NumericReply, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// WHOIS: answers from the user cache
pub struct WhoisHandler;

#[async_trait]
impl CommandHandler for WhoisHandler {
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        let nick = session.nick_or_star();
        if command.args.is_empty() || command.args.len() > 2 {
            return session
                .send_numeric(NumericReply::ErrUnknownError, &nick, "Invalid WHOIS command")
                .await;
        }
        // A second argument only asks for idle time, which is not tracked
        let target = &command.args[0];

        let Some(user) = session.user_by_name(target) else {
            return session
                .send_numeric(
                    NumericReply::ErrNoSuchNick,
                    &nick,
                    &format!("No such nick {}", target),
                )
                .await;
        };

        let server = session.server_name();
        session
            .send_numeric(
                NumericReply::RplWhoisUser,
                &format!("{} {} {} {} *", target, user.name, user.id, server),
                &user.real_name,
            )
            .await?;
        session
            .send_numeric(
                NumericReply::RplWhoisServer,
                &format!("{} {}", target, server),
                server,
            )
            .await?;
        session
            .send_numeric(NumericReply::RplWhoisChannels, &nick, target)
            .await
    }
}
