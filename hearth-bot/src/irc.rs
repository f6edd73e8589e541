//! [`Protocol`] over a real IRC server, backed by `hearth-sdk`.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use hearth_sdk::client::{self, ClientHandle, ConnectConfig, WhoisInfo};
use hearth_sdk::event::Event;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::identity::IdentityInfo;
use crate::message::Sender;
use crate::protocol::{Protocol, ProtocolEvent};

const EVENT_BUFFER: usize = 1024;

/// IRCv3 tag carrying the sender's services account.
const ACCOUNT_TAG: &str = "account";

pub struct IrcProtocol {
    config: ConnectConfig,
    handle: Mutex<Option<ClientHandle>>,
    events: mpsc::Sender<ProtocolEvent>,
}

impl IrcProtocol {
    /// The receiver yields translated events once [`Protocol::connect`] succeeds.
    pub fn new(config: ConnectConfig) -> (Arc<Self>, mpsc::Receiver<ProtocolEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let protocol = IrcProtocol {
            config,
            handle: Mutex::new(None),
            events,
        };
        (Arc::new(protocol), rx)
    }

    fn handle(&self) -> Result<ClientHandle> {
        self.handle.lock().clone().context("Not connected")
    }

    /// Say goodbye to the server, if connected.
    pub async fn quit(&self, message: &str) -> Result<()> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle.quit(Some(message)).await,
            None => Ok(()),
        }
    }
}

impl Protocol for IrcProtocol {
    fn connect(&self, attempts: u32) -> BoxFuture<'_, Result<()>> {
        async move {
            let (handle, events) = client::connect_with_retries(self.config.clone(), attempts)
                .await
                .with_context(|| format!("Failed to connect to {}", self.config.server_addr))?;
            *self.handle.lock() = Some(handle);
            tokio::spawn(forward(events, self.events.clone()));
            Ok(())
        }
        .boxed()
    }

    fn join<'a>(&'a self, channel: &'a str, password: Option<&'a str>) -> BoxFuture<'a, Result<()>> {
        async move { self.handle()?.join(channel, password).await }.boxed()
    }

    fn part<'a>(&'a self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        async move { self.handle()?.part(channel, None).await }.boxed()
    }

    fn send<'a>(&'a self, destination: &'a str, text: &'a str) -> BoxFuture<'a, Result<()>> {
        async move { self.handle()?.privmsg(destination, text).await }.boxed()
    }

    fn lookup_identity<'a>(&'a self, nick: &'a str) -> BoxFuture<'a, Result<IdentityInfo>> {
        async move {
            let info = self.handle()?.whois(nick).await?;
            Ok(info.into())
        }
        .boxed()
    }
}

impl From<WhoisInfo> for IdentityInfo {
    fn from(info: WhoisInfo) -> Self {
        IdentityInfo {
            nick: info.nick,
            user: info.user,
            host: info.host,
            realname: info.realname,
            server: info.server,
            account: info.account,
            channels: info.channels,
        }
    }
}

/// Translate client events until the client task ends.
async fn forward(mut events: mpsc::Receiver<Event>, out: mpsc::Sender<ProtocolEvent>) {
    let mut disconnected = false;
    while let Some(event) = events.recv().await {
        let Some(event) = translate(event) else {
            continue;
        };
        disconnected = matches!(event, ProtocolEvent::Disconnected { .. });
        if out.send(event).await.is_err() {
            return;
        }
    }
    if !disconnected {
        let _ = out
            .send(ProtocolEvent::Disconnected {
                reason: "Connection closed".to_string(),
            })
            .await;
    }
}

fn translate(event: Event) -> Option<ProtocolEvent> {
    Some(match event {
        Event::Connected => {
            debug!("Transport up, registering");
            return None;
        }
        Event::Registered { nick, server } => ProtocolEvent::Connected { server, nick },
        Event::Message {
            from,
            target,
            text,
            tags,
        } => ProtocolEvent::Message {
            sender: Sender {
                nick: from.nick,
                user: from.user,
                host: from.host,
                account: tags.get(ACCOUNT_TAG).cloned(),
            },
            target,
            content: text,
        },
        Event::Joined { channel, nick } => ProtocolEvent::Joined { channel, nick },
        Event::Parted { channel, nick } => ProtocolEvent::Parted { channel, nick },
        Event::Kicked {
            channel,
            nick,
            by,
            reason,
        } => ProtocolEvent::Kicked {
            channel,
            nick,
            by,
            reason,
        },
        Event::NickChanged { old_nick, new_nick } => {
            ProtocolEvent::NickChanged { old_nick, new_nick }
        }
        Event::ServerNotice { text } => {
            info!("Server: {text}");
            return None;
        }
        Event::UserQuit { .. } => return None,
        Event::Disconnected { reason } => ProtocolEvent::Disconnected { reason },
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use hearth_sdk::irc::Prefix;

    use super::*;

    #[test]
    fn account_tag_becomes_sender_account() {
        let mut tags = HashMap::new();
        tags.insert("account".to_string(), "alice".to_string());
        let event = translate(Event::Message {
            from: Prefix::parse("alice!al@example.org"),
            target: "#room".into(),
            text: "!help".into(),
            tags,
        });
        match event {
            Some(ProtocolEvent::Message { sender, target, content }) => {
                assert_eq!(sender.hostmask(), "alice!al@example.org");
                assert_eq!(sender.account.as_deref(), Some("alice"));
                assert_eq!(target, "#room");
                assert_eq!(content, "!help");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn registration_maps_to_connected() {
        let event = translate(Event::Registered {
            nick: "hearth".into(),
            server: "irc.example.org".into(),
        });
        assert!(matches!(
            event,
            Some(ProtocolEvent::Connected { ref server, ref nick })
                if server == "irc.example.org" && nick == "hearth"
        ));
        assert!(translate(Event::Connected).is_none());
    }

    #[tokio::test]
    async fn closed_client_reports_disconnect_once() {
        let (tx, rx) = mpsc::channel(4);
        let (out, mut translated) = mpsc::channel(4);
        tx.send(Event::Disconnected { reason: "EOF".into() }).await.unwrap();
        drop(tx);
        forward(rx, out).await;

        assert!(matches!(
            translated.recv().await,
            Some(ProtocolEvent::Disconnected { ref reason }) if reason == "EOF"
        ));
        assert!(translated.recv().await.is_none());
    }

    #[tokio::test]
    async fn calls_before_connect_fail() {
        let (protocol, _events) = IrcProtocol::new(ConnectConfig::default());
        assert!(protocol.send("#room", "hi").await.is_err());
        assert!(protocol.quit("bye").await.is_ok());
    }
}
