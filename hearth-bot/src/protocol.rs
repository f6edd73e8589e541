//! The narrow boundary between the bot core and whatever speaks the wire
//! protocol.
//!
//! Inbound traffic arrives as [`ProtocolEvent`]s fed to
//! [`Connection::handle_event`](crate::connection::Connection::handle_event);
//! outbound requests go through the [`Protocol`] trait. The production
//! implementation is [`IrcProtocol`](crate::irc::IrcProtocol).

use anyhow::Result;
use futures::future::BoxFuture;

use crate::identity::IdentityInfo;
use crate::message::Sender;

/// Handshake attempts handed to [`Protocol::connect`] unless configured.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Events the protocol collaborator reports to a connection.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// Registration finished; `server` is the identity the server gave.
    Connected { server: String, nick: String },
    /// A chat line addressed to a channel or to us.
    Message {
        sender: Sender,
        target: String,
        content: String,
    },
    Joined { channel: String, nick: String },
    Parted { channel: String, nick: String },
    Kicked {
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },
    NickChanged { old_nick: String, new_nick: String },
    Disconnected { reason: String },
}

/// Outbound capabilities the core needs from the protocol collaborator.
///
/// Every method resolves once. None of them carry a timeout; a lookup that
/// never answers stalls only the caller awaiting it.
pub trait Protocol: Send + Sync {
    /// Open the session, trying the handshake up to `attempts` times.
    fn connect(&self, attempts: u32) -> BoxFuture<'_, Result<()>>;

    /// Request membership; resolves when the server confirms it.
    fn join<'a>(&'a self, channel: &'a str, password: Option<&'a str>)
    -> BoxFuture<'a, Result<()>>;

    fn part<'a>(&'a self, channel: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Deliver one line of text. Rate limiting happens before this call.
    fn send<'a>(&'a self, destination: &'a str, text: &'a str) -> BoxFuture<'a, Result<()>>;

    fn lookup_identity<'a>(&'a self, nick: &'a str) -> BoxFuture<'a, Result<IdentityInfo>>;
}
