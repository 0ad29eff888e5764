//! PING, QUIT and MODE

use super::CommandHandler;
use crate::message::ParsedCommand;
use crate::session::Session;
use crate::{NumericReply, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// PING: echo the parameters back in a PONG
pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        let mut line = String::from("PONG");
        for arg in &command.args {
            line.push(' ');
            line.push_str(arg);
        }
        if !command.trailing().is_empty() {
            line.push_str(" :");
            line.push_str(command.trailing());
        }
        line.push_str("\r\n");
        session.send_line(line).await
    }
}

/// QUIT
pub struct QuitHandler;

#[async_trait]
impl CommandHandler for QuitHandler {
    async fn handle(&self, session: &Arc<Session>, _command: &ParsedCommand) -> Result<()> {
        tracing::info!("{} quit", session.nick_or_star());
        session.close();
        Ok(())
    }
}

/// MODE: nothing is ever set
pub struct ModeHandler;

#[async_trait]
impl CommandHandler for ModeHandler {
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        let nick = session.nick_or_star();
        match command.args.as_slice() {
            [] => {
                session
                    .send_numeric(NumericReply::ErrUnknownError, &nick, "Invalid MODE command")
                    .await
            }
            [target] => {
                session
                    .send_numeric(
                        NumericReply::RplChannelModeIs,
                        &format!("{} {} +", nick, target),
                        "",
                    )
                    .await
            }
            [target, flags @ ..] => {
                session
                    .send_numeric(
                        NumericReply::ErrUModeUnknownFlag,
                        target,
                        &format!("Unknown MODE flags {}", flags.join(" ")),
                    )
                    .await
            }
        }
    }
}
