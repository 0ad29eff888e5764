//! IRC numeric replies
//!
//! Only the replies the gateway actually emits are listed here. Every numeric
//! line has the shape `:<server> <code> <target> :<text>\r\n`, where the
//! target may itself carry several space separated parameters.

use crate::text::single_line;
use std::fmt;

/// IRC numeric reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NumericReply {
    // Connection registration
    RplWelcome = 1,
    RplSaveNick = 43,

    // WHOIS
    RplWhoisUser = 311,
    RplWhoisServer = 312,
    RplWhoisChannels = 319,

    // Channels
    RplChannelModeIs = 324,
    RplTopic = 332,
    RplNameReply = 353,
    RplEndOfNames = 366,

    // MOTD
    RplMotd = 372,
    RplMotdStart = 375,
    RplEndOfMotd = 376,

    // Error replies
    ErrUnknownError = 400,
    ErrNoSuchNick = 401,
    ErrUserNotInChannel = 441,
    ErrPasswdMismatch = 464,
    ErrUModeUnknownFlag = 501,
}

impl NumericReply {
    /// Get the numeric code as a u16
    pub fn numeric_code(&self) -> u16 {
        *self as u16
    }

    /// Get the numeric code as a zero padded, three digit string
    pub fn code(&self) -> String {
        format!("{:03}", self.numeric_code())
    }

    /// Format a complete reply line, terminator included
    pub fn line(&self, server: &str, target: &str, text: &str) -> String {
        format!(
            ":{} {} {} :{}\r\n",
            server,
            self.code(),
            single_line(target),
            single_line(text)
        )
    }
}

impl fmt::Display for NumericReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_zero_padded() {
        assert_eq!(NumericReply::RplWelcome.code(), "001");
        assert_eq!(NumericReply::RplSaveNick.code(), "043");
        assert_eq!(NumericReply::ErrUserNotInChannel.numeric_code(), 441);
        assert_eq!(NumericReply::RplEndOfMotd.to_string(), "376");
    }

    #[test]
    fn test_line_format() {
        let line = NumericReply::RplWelcome.line("irc.local", "alice", "Welcome, alice!");
        assert_eq!(line, ":irc.local 001 alice :Welcome, alice!\r\n");

        let line = NumericReply::RplTopic.line("irc.local", "alice #general", "");
        assert_eq!(line, ":irc.local 332 alice #general :\r\n");
    }

    #[test]
    fn test_line_breaks_in_text_are_flattened() {
        let line = NumericReply::RplWhoisUser.line("irc.local", "bob bob U2 irc.local *", "Bob\r\nQUIT");
        assert_eq!(line, ":irc.local 311 bob bob U2 irc.local * :Bob  QUIT\r\n");
    }
}
