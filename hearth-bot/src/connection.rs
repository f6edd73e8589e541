//! A single bot session: membership, inbound classification and the outbound
//! path.
//!
//! The protocol collaborator feeds [`ProtocolEvent`]s into
//! [`Connection::handle_event`]. Chat lines from ignored senders are dropped;
//! the rest are wrapped in an [`InboundMessage`] and emitted on the event
//! channel returned by [`Connection::new`], as either
//! [`ConnectionEvent::Command`] or [`ConnectionEvent::Message`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::identity::{self, IdentityCache, IdentityInfo};
use crate::mask::IgnorePredicate;
use crate::message::InboundMessage;
use crate::protocol::{self, Protocol, ProtocolEvent};
use crate::queue::{self, OutboundQueue};

const EVENT_BUFFER: usize = 256;

/// Read-only identity the bot presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Label used in logs.
    pub name: String,
    pub nick: String,
    /// Server address, `host:port`.
    pub host: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub identity: Identity,
    pub connect_attempts: u32,
    pub queue_interval: Duration,
    pub identity_decay: Duration,
}

impl ConnectionSettings {
    pub fn new(identity: Identity) -> Self {
        ConnectionSettings {
            identity,
            connect_attempts: protocol::DEFAULT_CONNECT_ATTEMPTS,
            queue_interval: queue::DEFAULT_INTERVAL,
            identity_decay: identity::DEFAULT_DECAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Classified inbound traffic.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Command(InboundMessage),
    Message(InboundMessage),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error("connection attempt already in progress")]
    AlreadyConnecting,
    #[error("already connected")]
    AlreadyConnected,
    #[error(transparent)]
    Protocol(anyhow::Error),
}

struct State {
    status: ConnectionState,
    nick: String,
    server: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    channels: Vec<String>,
}

struct Inner {
    settings: ConnectionSettings,
    protocol: Arc<dyn Protocol>,
    ignores: Arc<dyn IgnorePredicate>,
    queue: OutboundQueue,
    state: Mutex<State>,
    identities: Mutex<IdentityCache>,
    events: mpsc::Sender<ConnectionEvent>,
}

/// Cloneable handle on one session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("nick", &self.nick())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        settings: ConnectionSettings,
        protocol: Arc<dyn Protocol>,
        ignores: Arc<dyn IgnorePredicate>,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let queue = OutboundQueue::new(protocol.clone(), settings.queue_interval);
        let identities = IdentityCache::new(settings.identity_decay);
        let state = State {
            status: ConnectionState::Disconnected,
            nick: settings.identity.nick.clone(),
            server: None,
            connected_at: None,
            channels: Vec::new(),
        };
        let connection = Connection {
            inner: Arc::new(Inner {
                settings,
                protocol,
                ignores,
                queue,
                state: Mutex::new(state),
                identities: Mutex::new(identities),
                events,
            }),
        };
        (connection, rx)
    }

    pub fn id(&self) -> &str {
        &self.inner.settings.identity.name
    }

    /// Current nick; the configured one until the server says otherwise.
    pub fn nick(&self) -> String {
        self.inner.state.lock().nick.clone()
    }

    pub fn host(&self) -> &str {
        &self.inner.settings.identity.host
    }

    pub fn user(&self) -> &str {
        &self.inner.settings.identity.user
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().status
    }

    /// Name the server gave itself at registration.
    pub fn server(&self) -> Option<String> {
        self.inner.state.lock().server.clone()
    }

    pub fn connected_since(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().connected_at
    }

    /// Joined channels in join order.
    pub fn channels(&self) -> Vec<String> {
        self.inner.state.lock().channels.clone()
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.inner.queue
    }

    /// Start the handshake. Only valid from [`ConnectionState::Disconnected`];
    /// the state becomes `Connected` when the server confirms registration.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        {
            let mut state = self.inner.state.lock();
            match state.status {
                ConnectionState::Disconnected => state.status = ConnectionState::Connecting,
                ConnectionState::Connecting => return Err(ConnectionError::AlreadyConnecting),
                ConnectionState::Connected => return Err(ConnectionError::AlreadyConnected),
            }
        }

        let attempts = self.inner.settings.connect_attempts;
        info!(id = %self.id(), host = %self.host(), attempts, "Connecting");
        if let Err(e) = self.inner.protocol.connect(attempts).await {
            self.inner.state.lock().status = ConnectionState::Disconnected;
            return Err(ConnectionError::Protocol(e));
        }
        Ok(())
    }

    /// Resolves once the server confirms the join. Membership itself is
    /// updated by the confirming event.
    pub async fn join(&self, channel: &str, password: Option<&str>) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.inner
            .protocol
            .join(channel, password)
            .await
            .map_err(ConnectionError::Protocol)
    }

    pub async fn part(&self, channel: &str) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.inner
            .protocol
            .part(channel)
            .await
            .map_err(ConnectionError::Protocol)
    }

    fn ensure_connected(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    /// Queue one line for `destination`.
    pub fn say(&self, destination: &str, text: &str) {
        self.inner.queue.push(destination, text);
    }

    /// Queue `text` for every joined channel, in join order.
    pub fn broadcast(&self, text: &str) {
        for channel in self.channels() {
            self.say(&channel, text);
        }
    }

    /// Identity of `nick`, from the cache when fresh.
    ///
    /// A cache hit still yields to the scheduler once, so callers observe
    /// the same ordering either way.
    pub async fn whois(&self, nick: &str) -> anyhow::Result<IdentityInfo> {
        let cached = self.inner.identities.lock().get(nick);
        if let Some(info) = cached {
            debug!(nick, "Identity cache hit");
            tokio::task::yield_now().await;
            return Ok(info);
        }

        debug!(nick, "Identity cache miss");
        let info = self.inner.protocol.lookup_identity(nick).await?;
        self.inner.identities.lock().set(nick, info.clone());
        Ok(info)
    }

    /// Stop the outbound timer.
    pub fn stop(&self) {
        self.inner.queue.stop();
    }

    fn is_self(&self, nick: &str) -> bool {
        self.inner.state.lock().nick.eq_ignore_ascii_case(nick)
    }

    fn add_channel(&self, channel: &str) -> bool {
        let mut state = self.inner.state.lock();
        if state.channels.iter().any(|c| c.eq_ignore_ascii_case(channel)) {
            return false;
        }
        state.channels.push(channel.to_string());
        true
    }

    fn remove_channel(&self, channel: &str) -> bool {
        let mut state = self.inner.state.lock();
        match state.channels.iter().position(|c| c.eq_ignore_ascii_case(channel)) {
            Some(index) => {
                state.channels.remove(index);
                true
            }
            None => false,
        }
    }

    /// Apply one event from the protocol collaborator.
    pub async fn handle_event(&self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Connected { server, nick } => {
                {
                    let mut state = self.inner.state.lock();
                    state.status = ConnectionState::Connected;
                    state.nick = nick.clone();
                    state.server = Some(server.clone());
                    state.connected_at = Some(Utc::now());
                }
                info!(id = %self.id(), %server, %nick, "Connected");
            }

            ProtocolEvent::Message {
                sender,
                target,
                content,
            } => {
                if self.inner.ignores.is_ignored(&sender) {
                    debug!(sender = %sender.hostmask(), "Dropping line from ignored sender");
                    return;
                }
                let message = InboundMessage::new(sender, target, &content, self.clone());
                let event = if message.is_command() {
                    ConnectionEvent::Command(message)
                } else {
                    ConnectionEvent::Message(message)
                };
                if self.inner.events.send(event).await.is_err() {
                    debug!("No subscriber for inbound events");
                }
            }

            ProtocolEvent::Joined { channel, nick } => {
                if self.is_self(&nick) && self.add_channel(&channel) {
                    info!(%channel, "Joined");
                }
            }

            ProtocolEvent::Parted { channel, nick } => {
                if self.is_self(&nick) && self.remove_channel(&channel) {
                    info!(%channel, "Parted");
                }
            }

            ProtocolEvent::Kicked {
                channel,
                nick,
                by,
                reason,
            } => {
                if self.is_self(&nick) && self.remove_channel(&channel) {
                    warn!(%channel, %by, %reason, "Kicked");
                }
            }

            ProtocolEvent::NickChanged { old_nick, new_nick } => {
                if self.is_self(&old_nick) {
                    info!(%old_nick, %new_nick, "Nick changed");
                    self.inner.state.lock().nick = new_nick;
                } else {
                    self.inner.identities.lock().remove(&old_nick);
                }
            }

            ProtocolEvent::Disconnected { reason } => {
                {
                    let mut state = self.inner.state.lock();
                    state.status = ConnectionState::Disconnected;
                    state.channels.clear();
                    state.connected_at = None;
                }
                warn!(id = %self.id(), %reason, "Disconnected");
            }
        }
    }
}
