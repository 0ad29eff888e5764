//! Connection registration: CAP, PASS, NICK and USER

use super::CommandHandler;
use crate::bridge;
use crate::message::ParsedCommand;
use crate::session::Session;
use crate::{NumericReply, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// CAP: no capabilities are offered
pub struct CapHandler;

#[async_trait]
impl CommandHandler for CapHandler {
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        match command.args.first().map(String::as_str) {
            Some("LS") => {
                session
                    .send_line(format!(":{} CAP * LS :\r\n", session.server_name()))
                    .await
            }
            _ => {
                tracing::debug!("Ignoring CAP {:?}", command.args);
                Ok(())
            }
        }
    }
}

/// PASS: the workspace API credential
pub struct PassHandler;

#[async_trait]
impl CommandHandler for PassHandler {
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        if command.args.len() != 1 {
            tracing::warn!("Invalid PASS arguments from {}", session.id);
            return session
                .send_numeric(NumericReply::ErrPasswdMismatch, "*", "Invalid password")
                .await;
        }
        session.set_api_key(&command.args[0]);
        Ok(())
    }
}

/// NICK: connects to the workspace; the nickname always follows the account
pub struct NickHandler;

#[async_trait]
impl CommandHandler for NickHandler {
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        let Some(requested) = command.args.first() else {
            tracing::warn!("Invalid NICK command from {}: no nickname", session.id);
            return Ok(());
        };

        if let Err(e) = bridge::ensure_connected(session).await {
            tracing::error!("Cannot connect {} to the workspace: {}", session.remote_addr, e);
            session.close_with_error(&e.to_string()).await;
            return Ok(());
        }

        let nick = session.nick();
        if *requested != nick {
            session
                .send_numeric(
                    NumericReply::RplSaveNick,
                    requested,
                    &format!("Your nickname is {} and cannot be changed", nick),
                )
                .await?;
        }
        tracing::info!("Nickname for {} is {}", session.remote_addr, nick);
        Ok(())
    }
}

/// USER: records username and real name
pub struct UserHandler;

#[async_trait]
impl CommandHandler for UserHandler {
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        if session.nick().is_empty() {
            tracing::warn!("USER from {} before a nickname was set", session.id);
            return Ok(());
        }
        if command.args.len() < 3 {
            tracing::warn!("Invalid USER arguments from {}: {:?}", session.id, command.args);
            return Ok(());
        }
        session.set_user(&command.args[0], command.trailing());
        Ok(())
    }
}
