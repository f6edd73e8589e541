//! Inbound chat lines and their classification.
//!
//! Classification is a pure function of `(target, content)`: a line is a
//! command when its trimmed content starts with [`COMMAND_PREFIX`], and it is
//! private when the target does not start with a channel prefix.

use std::fmt;

use crate::commands::Reply;
use crate::connection::Connection;

/// Prefix that marks a line as a command, as in `!help`.
pub const COMMAND_PREFIX: char = '!';

/// First characters that mark a target as a channel.
pub const CHANNEL_PREFIXES: [char; 2] = ['#', '!'];

/// Whether `target` names a channel rather than a peer.
pub fn is_channel(target: &str) -> bool {
    target.starts_with(CHANNEL_PREFIXES)
}

/// Raw metadata about whoever sent a line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sender {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
    /// Services account, when the server tags messages with it.
    pub account: Option<String>,
}

impl Sender {
    pub fn new(nick: impl Into<String>) -> Self {
        Sender {
            nick: nick.into(),
            ..Default::default()
        }
    }

    /// `nick!user@host`, with `*` for unknown parts.
    pub fn hostmask(&self) -> String {
        format!(
            "{}!{}@{}",
            self.nick,
            self.user.as_deref().unwrap_or("*"),
            self.host.as_deref().unwrap_or("*")
        )
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nick)
    }
}

/// One received chat line, bound to the connection it arrived on.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    sender: Sender,
    target: String,
    content: String,
    origin: Connection,
}

impl InboundMessage {
    pub fn new(
        sender: Sender,
        target: impl Into<String>,
        content: &str,
        origin: Connection,
    ) -> Self {
        InboundMessage {
            sender,
            target: target.into(),
            content: content.trim().to_string(),
            origin,
        }
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Trimmed text of the line.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn origin(&self) -> &Connection {
        &self.origin
    }

    pub fn is_private(&self) -> bool {
        !is_channel(&self.target)
    }

    pub fn is_command(&self) -> bool {
        self.content.starts_with(COMMAND_PREFIX)
    }

    /// Splits the text after the prefix at its first whitespace character.
    fn command_parts(&self) -> Option<(&str, &str)> {
        let body = self.content.strip_prefix(COMMAND_PREFIX)?;
        Some(body.split_once(char::is_whitespace).unwrap_or((body, "")))
    }

    /// Text between the prefix and the first whitespace.
    pub fn command_name(&self) -> Option<&str> {
        self.command_parts().map(|(name, _)| name)
    }

    /// Whitespace-separated words after the command name.
    pub fn args(&self) -> Vec<String> {
        match self.command_parts() {
            Some((_, rest)) => rest.split_whitespace().map(str::to_string).collect(),
            None => Vec::new(),
        }
    }

    /// The sender for private lines, the channel otherwise.
    pub fn reply_target(&self) -> &str {
        if self.is_private() {
            &self.sender.nick
        } else {
            &self.target
        }
    }

    /// Queue each line of `reply` to [`reply_target`](Self::reply_target).
    pub fn reply(&self, reply: impl Into<Reply>) {
        for line in reply.into().into_lines() {
            self.origin.say(self.reply_target(), &line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn message(sender: &str, target: &str, content: &str) -> InboundMessage {
        let (conn, _events, _protocol) = testing::connection();
        InboundMessage::new(Sender::new(sender), target, content, conn)
    }

    #[test]
    fn channel_command() {
        let msg = message("alice", "#room", "!kick alice");
        assert!(msg.is_command());
        assert!(!msg.is_private());
        assert_eq!(msg.command_name(), Some("kick"));
        assert_eq!(msg.args(), vec!["alice"]);
        assert_eq!(msg.reply_target(), "#room");
    }

    #[test]
    fn private_plain_message() {
        let msg = message("bob", "mybot", "hello");
        assert!(!msg.is_command());
        assert!(msg.is_private());
        assert_eq!(msg.command_name(), None);
        assert!(msg.args().is_empty());
        assert_eq!(msg.reply_target(), "bob");
    }

    #[test]
    fn content_is_trimmed_before_classification() {
        let msg = message("bob", "#room", "   !help  \r\n");
        assert_eq!(msg.content(), "!help");
        assert!(msg.is_command());
        assert_eq!(msg.command_name(), Some("help"));
    }

    #[test]
    fn bang_prefixed_target_is_a_channel() {
        let msg = message("bob", "!ABCDEroom", "hi");
        assert!(!msg.is_private());
        assert_eq!(msg.reply_target(), "!ABCDEroom");
    }

    #[test]
    fn args_collapse_repeated_whitespace() {
        let msg = message("bob", "#room", "!say   #other   hello\tthere");
        assert_eq!(msg.command_name(), Some("say"));
        assert_eq!(msg.args(), vec!["#other", "hello", "there"]);
    }

    #[test]
    fn bare_prefix_has_empty_name() {
        let msg = message("bob", "#room", "!");
        assert!(msg.is_command());
        assert_eq!(msg.command_name(), Some(""));
    }

    #[test]
    fn space_after_prefix_gives_empty_name() {
        let msg = message("bob", "#room", "! help now");
        assert!(msg.is_command());
        assert_eq!(msg.command_name(), Some(""));
        assert_eq!(msg.args(), vec!["help", "now"]);
    }

    #[test]
    fn hostmask_fills_unknown_parts() {
        let mut sender = Sender::new("carol");
        assert_eq!(sender.hostmask(), "carol!*@*");
        sender.user = Some("c".into());
        sender.host = Some("example.org".into());
        assert_eq!(sender.hostmask(), "carol!c@example.org");
    }

    #[tokio::test(start_paused = true)]
    async fn reply_goes_to_reply_target() {
        let (conn, _events, protocol) = testing::connection();
        let channel = InboundMessage::new(Sender::new("alice"), "#room", "!x", conn.clone());
        let private = InboundMessage::new(Sender::new("bob"), "hearth", "!x", conn);

        channel.reply(vec!["one".to_string(), "two".to_string()]);
        private.reply("three");
        testing::drain(3).await;

        assert_eq!(
            protocol.sent(),
            vec![
                ("#room".to_string(), "one".to_string()),
                ("#room".to_string(), "two".to_string()),
                ("bob".to_string(), "three".to_string()),
            ]
        );
    }
}
