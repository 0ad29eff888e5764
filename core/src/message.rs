//! IRC line framing
//!
//! Inbound lines are split into prefix, command verb, middle arguments and the
//! trailing parameter. The framer is deliberately strict in one direction
//! only: a line must end in `\r\n`, but nothing else about it is validated.

use crate::text::single_line;
use crate::{Error, Result};
use std::fmt;

/// A parsed client line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Prefix without the leading colon, empty when absent
    pub prefix: String,
    /// Command verb, exactly as sent
    pub command: String,
    /// Middle arguments
    pub args: Vec<String>,
    /// Trailing parameter without its leading colon
    pub trailing: Option<String>,
}

impl ParsedCommand {
    /// Create a command with no prefix
    pub fn new(command: &str, args: &[&str], trailing: Option<&str>) -> Self {
        Self {
            prefix: String::new(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            trailing: trailing.map(str::to_string),
        }
    }

    /// Parse one line as read from the socket, terminator included
    pub fn parse(line: &str) -> Result<Self> {
        if line.is_empty() {
            return Err(Error::MessageParse("Empty message".to_string()));
        }

        let (prefix, data) = match line.strip_prefix(':') {
            Some(rest) => match rest.split_once(' ') {
                Some((prefix, data)) => (prefix, data),
                None => (rest, ""),
            },
            None => ("", line),
        };

        let data = data.strip_suffix("\r\n").ok_or_else(|| {
            Error::MessageParse("Invalid data: not terminated with <CR><LF>".to_string())
        })?;

        let mut tokens = data.split(' ');
        let command = tokens.next().unwrap_or_default();
        if command.is_empty() {
            return Err(Error::MessageParse("No command found".to_string()));
        }

        let mut args = Vec::new();
        let mut trailing = None;
        while let Some(token) = tokens.next() {
            if let Some(first) = token.strip_prefix(':') {
                let mut rest = vec![first];
                rest.extend(tokens.by_ref());
                trailing = Some(rest.join(" "));
                break;
            }
            args.push(token.to_string());
        }

        Ok(Self {
            prefix: prefix.to_string(),
            command: command.to_string(),
            args,
            trailing,
        })
    }

    /// Trailing parameter, empty when absent
    pub fn trailing(&self) -> &str {
        self.trailing.as_deref().unwrap_or_default()
    }

    /// Serialize back into a wire line, terminator included
    pub fn to_line(&self) -> String {
        let mut line = String::new();
        if !self.prefix.is_empty() {
            line.push(':');
            line.push_str(&self.prefix);
            line.push(' ');
        }
        line.push_str(&self.command);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        if let Some(ref trailing) = self.trailing {
            line.push_str(" :");
            line.push_str(trailing);
        }
        line.push_str("\r\n");
        line
    }
}

impl fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line().trim_end())
    }
}

/// `nick!user@host`
pub fn user_mask(nick: &str, user: &str, host: &str) -> String {
    single_line(&format!("{}!{}@{}", nick, user, host))
}

/// Format a command line sent on behalf of `source`.
///
/// Line breaks inside `source` or `params` become spaces.
pub fn command_line(source: &str, command: &str, params: &str) -> String {
    format!(
        ":{} {} {}\r\n",
        single_line(source),
        command,
        single_line(params)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_is_one_line() {
        let line = command_line("bob!U2@gw", "TOPIC", "#general :x\r\n:evil!e@h PRIVMSG alice :pwned");
        assert_eq!(line, ":bob!U2@gw TOPIC #general :x  :evil!e@h PRIVMSG alice :pwned\r\n");
        assert_eq!(user_mask("b\nob", "U2", "gw"), "b ob!U2@gw");
    }

    #[test]
    fn test_parse_simple_message() {
        let cmd = ParsedCommand::parse("NICK alice\r\n").unwrap();
        assert_eq!(cmd.command, "NICK");
        assert_eq!(cmd.args, vec!["alice"]);
        assert!(cmd.prefix.is_empty());
        assert!(cmd.trailing.is_none());
        assert_eq!(cmd.trailing(), "");
    }

    #[test]
    fn test_parse_message_with_prefix_and_trailing() {
        let cmd = ParsedCommand::parse(":alice!a@host PRIVMSG #channel :Hello  world :)\r\n").unwrap();
        assert_eq!(cmd.prefix, "alice!a@host");
        assert_eq!(cmd.command, "PRIVMSG");
        assert_eq!(cmd.args, vec!["#channel"]);
        assert_eq!(cmd.trailing(), "Hello  world :)");
    }

    #[test]
    fn test_parse_user_command() {
        let cmd = ParsedCommand::parse("USER x 0 * :Real Name\r\n").unwrap();
        assert_eq!(cmd.args, vec!["x", "0", "*"]);
        assert_eq!(cmd.trailing(), "Real Name");
    }

    #[test]
    fn test_empty_trailing_is_kept() {
        let cmd = ParsedCommand::parse("TOPIC #a :\r\n").unwrap();
        assert_eq!(cmd.trailing.as_deref(), Some(""));
        assert_eq!(cmd.to_line(), "TOPIC #a :\r\n");
    }

    #[test]
    fn test_rejects_missing_crlf() {
        assert!(ParsedCommand::parse("NICK alice\n").is_err());
        assert!(ParsedCommand::parse("NICK alice").is_err());
        assert!(ParsedCommand::parse(":prefix NICK alice\n").is_err());
        assert!(ParsedCommand::parse("").is_err());
        assert!(ParsedCommand::parse("\r\n").is_err());
    }

    #[test]
    fn test_round_trip_preserves_lines() {
        let lines = [
            "PING\r\n",
            "PING :irc.local\r\n",
            "MODE #chan +o bob\r\n",
            ":server.example 001 alice :Welcome home\r\n",
            "PRIVMSG bob :two words\r\n",
            "CAP LS 302\r\n",
        ];
        for line in lines {
            let cmd = ParsedCommand::parse(line).unwrap();
            assert_eq!(cmd.to_line(), line);
            assert_eq!(ParsedCommand::parse(&cmd.to_line()).unwrap(), cmd);
        }
    }

    #[test]
    fn test_outbound_helpers() {
        assert_eq!(user_mask("alice", "U1", "irc.local"), "alice!U1@irc.local");
        assert_eq!(
            command_line("alice!U1@irc.local", "JOIN", "#general"),
            ":alice!U1@irc.local JOIN #general\r\n"
        );
    }
}
