//! Events emitted by the IRC client for the consumer to handle.

use std::collections::HashMap;

use crate::irc::Prefix;

/// Events that the SDK emits to the consumer (bot runtime, tools, tests).
#[derive(Debug, Clone)]
pub enum Event {
    /// TCP (and TLS, if enabled) connection is up; registration pending.
    Connected,

    /// IRC registration complete. `nick` is our confirmed nick and
    /// `server` the name the server announced itself with.
    Registered {
        nick: String,
        server: String,
    },

    /// Someone (possibly us) joined a channel.
    Joined {
        channel: String,
        nick: String,
    },

    /// Someone (possibly us) left a channel.
    Parted {
        channel: String,
        nick: String,
    },

    /// Someone (possibly us) was kicked from a channel.
    Kicked {
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },

    /// A PRIVMSG in a channel or a private message.
    Message {
        from: Prefix,
        target: String,
        text: String,
        /// IRCv3 message tags (empty if none).
        tags: HashMap<String, String>,
    },

    /// A user changed nick.
    NickChanged {
        old_nick: String,
        new_nick: String,
    },

    /// Someone quit the server.
    UserQuit {
        nick: String,
        reason: String,
    },

    /// Server NOTICE or error numeric.
    ServerNotice {
        text: String,
    },

    /// Connection was closed.
    Disconnected {
        reason: String,
    },
}
