//! In-memory protocol double for unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::connection::{Connection, ConnectionEvent, ConnectionSettings, Identity};
use crate::identity::IdentityInfo;
use crate::protocol::Protocol;
use crate::queue::DEFAULT_INTERVAL;

/// Records every outbound call and answers from canned data.
#[derive(Default)]
pub struct RecordingProtocol {
    sent: Mutex<Vec<(String, String)>>,
    joins: Mutex<Vec<(String, Option<String>)>>,
    parts: Mutex<Vec<String>>,
    connects: Mutex<Vec<u32>>,
    identities: Mutex<HashMap<String, IdentityInfo>>,
    lookups: AtomicUsize,
    fail_sends: AtomicBool,
    fail_connect: AtomicBool,
}

impl RecordingProtocol {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn joins(&self) -> Vec<(String, Option<String>)> {
        self.joins.lock().clone()
    }

    pub fn parts(&self) -> Vec<String> {
        self.parts.lock().clone()
    }

    pub fn connect_attempts(&self) -> Vec<u32> {
        self.connects.lock().clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn set_identity(&self, info: IdentityInfo) {
        self.identities.lock().insert(info.nick.to_lowercase(), info);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }
}

impl Protocol for RecordingProtocol {
    fn connect(&self, attempts: u32) -> BoxFuture<'_, Result<()>> {
        self.connects.lock().push(attempts);
        let result = if self.fail_connect.load(Ordering::SeqCst) {
            Err(anyhow!("connection refused"))
        } else {
            Ok(())
        };
        futures::future::ready(result).boxed()
    }

    fn join<'a>(&'a self, channel: &'a str, password: Option<&'a str>) -> BoxFuture<'a, Result<()>> {
        self.joins
            .lock()
            .push((channel.to_string(), password.map(str::to_string)));
        futures::future::ready(Ok(())).boxed()
    }

    fn part<'a>(&'a self, channel: &'a str) -> BoxFuture<'a, Result<()>> {
        self.parts.lock().push(channel.to_string());
        futures::future::ready(Ok(())).boxed()
    }

    fn send<'a>(&'a self, destination: &'a str, text: &'a str) -> BoxFuture<'a, Result<()>> {
        let result = if self.fail_sends.load(Ordering::SeqCst) {
            Err(anyhow!("broken pipe"))
        } else {
            self.sent.lock().push((destination.to_string(), text.to_string()));
            Ok(())
        };
        futures::future::ready(result).boxed()
    }

    fn lookup_identity<'a>(&'a self, nick: &'a str) -> BoxFuture<'a, Result<IdentityInfo>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let result = self
            .identities
            .lock()
            .get(&nick.to_lowercase())
            .cloned()
            .ok_or_else(|| anyhow!("No such nick: {nick}"));
        futures::future::ready(result).boxed()
    }
}

pub fn settings() -> ConnectionSettings {
    ConnectionSettings::new(Identity {
        name: "test".into(),
        nick: "hearth".into(),
        host: "irc.example.org:6667".into(),
        user: "hearth".into(),
    })
}

/// A disconnected connection over a fresh [`RecordingProtocol`], ignoring nobody.
pub fn connection() -> (
    Connection,
    mpsc::Receiver<ConnectionEvent>,
    Arc<RecordingProtocol>,
) {
    let protocol = Arc::new(RecordingProtocol::default());
    let (conn, events) = Connection::new(settings(), protocol.clone(), Arc::new(()));
    (conn, events, protocol)
}

/// Let `ticks` queue ticks elapse. Needs paused time.
pub async fn drain(ticks: u32) {
    tokio::time::sleep(DEFAULT_INTERVAL * ticks + Duration::from_millis(10)).await;
}
