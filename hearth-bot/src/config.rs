//! Bot configuration.
//!
//! Lives at `~/.config/hearth/bot.toml` unless `--config` says otherwise.
//! Every field has a default, so a missing file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hearth_sdk::client::ConnectConfig;
use serde::Deserialize;

use crate::connection::{ConnectionSettings, Identity};
use crate::identity;
use crate::protocol::DEFAULT_CONNECT_ATTEMPTS;
use crate::queue;

pub const DEFAULT_SERVER: &str = "127.0.0.1:6667";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Label for this bot in logs.
    pub name: String,
    pub nick: String,
    /// Server address (host:port).
    pub host: String,
    pub user: String,
    pub realname: String,
    /// Use TLS. Port 6697 implies it.
    pub tls: bool,
    /// Skip TLS certificate verification.
    pub tls_insecure: bool,
    pub connect_attempts: u32,
    pub channels: Vec<ChannelConfig>,
    /// Hostmask or `account:` patterns whose lines are dropped.
    pub ignores: Vec<String>,
    pub queue: QueueConfig,
    pub identity: IdentityConfig,
    pub permissions: PermissionsConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            name: "hearth".to_string(),
            nick: "hearth".to_string(),
            host: DEFAULT_SERVER.to_string(),
            user: "hearth".to_string(),
            realname: "hearth bot".to_string(),
            tls: false,
            tls_insecure: false,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            channels: Vec::new(),
            ignores: Vec::new(),
            queue: QueueConfig::default(),
            identity: IdentityConfig::default(),
            permissions: PermissionsConfig::default(),
        }
    }
}

/// A channel to join at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl From<&str> for ChannelConfig {
    fn from(name: &str) -> Self {
        ChannelConfig {
            name: name.to_string(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            interval_ms: queue::DEFAULT_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub decay_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            decay_secs: identity::DEFAULT_DECAY.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub admins: Vec<String>,
    pub users: Vec<String>,
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hearth")
        .join("bot.toml")
}

impl BotConfig {
    /// Read `path`, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Bad config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        anyhow::ensure!(
            config.queue.interval_ms > 0,
            "queue.interval_ms must be greater than zero"
        );
        Ok(config)
    }

    pub fn identity(&self) -> Identity {
        Identity {
            name: self.name.clone(),
            nick: self.nick.clone(),
            host: self.host.clone(),
            user: self.user.clone(),
        }
    }

    pub fn uses_tls(&self) -> bool {
        self.tls || self.host.ends_with(":6697")
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            identity: self.identity(),
            connect_attempts: self.connect_attempts,
            queue_interval: Duration::from_millis(self.queue.interval_ms),
            identity_decay: Duration::from_secs(self.identity.decay_secs),
        }
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            server_addr: self.host.clone(),
            nick: self.nick.clone(),
            user: self.user.clone(),
            realname: self.realname.clone(),
            tls: self.uses_tls(),
            tls_insecure: self.tls_insecure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = BotConfig::parse("").unwrap();
        assert_eq!(config.nick, "hearth");
        assert_eq!(config.connect_attempts, 5);
        let settings = config.connection_settings();
        assert_eq!(settings.queue_interval, Duration::from_millis(500));
        assert_eq!(settings.identity_decay, Duration::from_secs(60));
    }

    #[test]
    fn full_file() {
        let config = BotConfig::parse(
            r##"
            name = "libera"
            nick = "ember"
            host = "irc.libera.chat:6697"
            user = "ember"
            ignores = ["*!*@spam.example", "account:troll"]

            [[channels]]
            name = "#rust"

            [[channels]]
            name = "#secret"
            password = "hunter2"

            [queue]
            interval_ms = 1000

            [identity]
            decay_secs = 30

            [permissions]
            admins = ["*!*@admin.example"]
            users = ["account:friend"]
            "##,
        )
        .unwrap();

        assert_eq!(config.identity().name, "libera");
        assert!(config.uses_tls());
        assert_eq!(
            config.channels,
            vec![
                ChannelConfig::from("#rust"),
                ChannelConfig {
                    name: "#secret".into(),
                    password: Some("hunter2".into()),
                },
            ]
        );
        assert_eq!(config.ignores.len(), 2);
        assert_eq!(config.connection_settings().queue_interval, Duration::from_secs(1));
        assert_eq!(config.identity.decay_secs, 30);
        assert_eq!(config.permissions.admins, vec!["*!*@admin.example"]);

        let connect = config.connect_config();
        assert_eq!(connect.server_addr, "irc.libera.chat:6697");
        assert!(connect.tls);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(BotConfig::parse("nick = [").is_err());
        assert!(BotConfig::parse("connect_attempts = \"many\"").is_err());
    }

    #[test]
    fn zero_queue_interval_is_rejected() {
        let err = BotConfig::parse("[queue]\ninterval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
    }

    #[test]
    fn missing_file_falls_back() {
        let config = BotConfig::load(Path::new("/nonexistent/hearth/bot.toml")).unwrap();
        assert_eq!(config.host, DEFAULT_SERVER);
    }
}
