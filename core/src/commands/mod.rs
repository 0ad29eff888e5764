//! Command dispatch
//!
//! Each supported IRC verb maps to one [`CommandHandler`]. Lookup is an exact,
//! case-sensitive match on the verb as sent by the client.

mod channel;
mod messaging;
mod misc;
mod query;
mod registration;

pub use channel::{JoinHandler, PartHandler};
pub use messaging::PrivmsgHandler;
pub use misc::{ModeHandler, PingHandler, QuitHandler};
pub use query::WhoisHandler;
pub use registration::{CapHandler, NickHandler, PassHandler, UserHandler};

use crate::message::ParsedCommand;
use crate::session::Session;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Handler for one IRC verb
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a command sent by the session's client
    async fn handle(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()>;
}

/// Verb to handler table
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl Dispatcher {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with every built-in verb registered
    pub fn with_default_handlers() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register("CAP", Box::new(CapHandler));
        dispatcher.register("PASS", Box::new(PassHandler));
        dispatcher.register("NICK", Box::new(NickHandler));
        dispatcher.register("USER", Box::new(UserHandler));
        dispatcher.register("PING", Box::new(PingHandler));
        dispatcher.register("QUIT", Box::new(QuitHandler));
        dispatcher.register("MODE", Box::new(ModeHandler));
        dispatcher.register("PRIVMSG", Box::new(PrivmsgHandler));
        dispatcher.register("JOIN", Box::new(JoinHandler));
        dispatcher.register("PART", Box::new(PartHandler));
        dispatcher.register("WHOIS", Box::new(WhoisHandler));
        dispatcher
    }

    /// Register or replace the handler of a verb
    pub fn register(&mut self, verb: &'static str, handler: Box<dyn CommandHandler>) {
        self.handlers.insert(verb, handler);
    }

    pub fn handler(&self, verb: &str) -> Option<&dyn CommandHandler> {
        self.handlers.get(verb).map(|h| h.as_ref())
    }

    pub fn supports(&self, verb: &str) -> bool {
        self.handlers.contains_key(verb)
    }

    /// Run the handler of `command`; unknown verbs are logged and ignored
    pub async fn dispatch(&self, session: &Arc<Session>, command: &ParsedCommand) -> Result<()> {
        match self.handler(&command.command) {
            Some(handler) => handler.handle(session, command).await,
            None => {
                tracing::warn!("Unknown command {} from {}", command.command, session.id);
                Ok(())
            }
        }
    }
}

/// Strip one leading `#` from a channel argument
pub(crate) fn channel_name(arg: &str) -> &str {
    arg.strip_prefix('#').unwrap_or(arg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbs_are_case_sensitive() {
        let dispatcher = Dispatcher::with_default_handlers();
        for verb in ["CAP", "PASS", "NICK", "USER", "PING", "QUIT", "MODE", "PRIVMSG", "JOIN", "PART", "WHOIS"] {
            assert!(dispatcher.supports(verb), "{} not registered", verb);
        }
        assert!(!dispatcher.supports("nick"));
        assert!(!dispatcher.supports("TOPIC"));
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_name("#general"), "general");
        assert_eq!(channel_name("general"), "general");
        assert_eq!(channel_name("##dev"), "#dev");
    }
}
