//! Short-lived cache of WHOIS-style identity lookups.
//!
//! Keys are lower-cased nicks. Entries go stale `decay` after insertion and
//! are evicted lazily on [`IdentityCache::get`]; there is no sweeper.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// How long a lookup stays fresh unless configured otherwise.
pub const DEFAULT_DECAY: Duration = Duration::from_secs(60);

/// What the protocol collaborator knows about a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityInfo {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
    pub realname: Option<String>,
    pub server: Option<String>,
    /// Services account the peer is logged in to, if any.
    pub account: Option<String>,
    pub channels: Vec<String>,
}

impl IdentityInfo {
    /// One-line human summary, e.g. for a `whois` reply.
    pub fn summary(&self) -> String {
        let mut out = self.nick.clone();
        if let (Some(user), Some(host)) = (&self.user, &self.host) {
            out.push_str(&format!(" is {user}@{host}"));
        }
        if let Some(realname) = &self.realname {
            out.push_str(&format!(" ({realname})"));
        }
        match &self.account {
            Some(account) => out.push_str(&format!(", logged in as {account}")),
            None => out.push_str(", not logged in"),
        }
        if !self.channels.is_empty() {
            out.push_str(&format!(", on {}", self.channels.join(" ")));
        }
        out
    }
}

#[derive(Debug)]
struct CacheEntry {
    info: IdentityInfo,
    inserted_at: Instant,
}

#[derive(Debug)]
pub struct IdentityCache {
    decay: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(DEFAULT_DECAY)
    }
}

impl IdentityCache {
    pub fn new(decay: Duration) -> Self {
        IdentityCache {
            decay,
            entries: HashMap::new(),
        }
    }

    pub fn decay(&self) -> Duration {
        self.decay
    }

    /// Fresh entry for `nick`, evicting it if stale.
    pub fn get(&mut self, nick: &str) -> Option<IdentityInfo> {
        let key = nick.to_lowercase();
        let entry = self.entries.get(&key)?;
        if entry.inserted_at.elapsed() < self.decay {
            return Some(entry.info.clone());
        }
        self.entries.remove(&key);
        None
    }

    /// Store `info`, replacing any previous entry and restarting its clock.
    pub fn set(&mut self, nick: &str, info: IdentityInfo) {
        self.entries.insert(
            nick.to_lowercase(),
            CacheEntry {
                info,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, nick: &str) {
        self.entries.remove(&nick.to_lowercase());
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
