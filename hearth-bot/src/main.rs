//! hearth-bot: connect to an IRC server, join channels and answer commands.
//!
//!   !help              List commands
//!   !ping              Liveness check
//!   !uptime            Time since registration
//!   !whois <nick>      Identity lookup (logged-in users)
//!   !channels          Joined channels (admins)
//!   !join <chan> [key] Join a channel (admins)
//!   !broadcast <text>  Say something everywhere (admins)
//!   !ignore add|remove <mask>, !ignore list   Edit the ignore list (admins)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use hearth_bot::builtins::{register_builtins, register_ignore_command};
use hearth_bot::commands::CommandRegistry;
use hearth_bot::config::{self, BotConfig, ChannelConfig};
use hearth_bot::connection::{Connection, ConnectionState};
use hearth_bot::dispatch::Dispatcher;
use hearth_bot::irc::IrcProtocol;
use hearth_bot::mask::IgnoreList;
use hearth_bot::permission::{HostmaskAuthorizer, PermissionPolicy};

#[derive(Parser)]
#[command(name = "hearth-bot", about = "Command-driven IRC bot")]
struct Args {
    /// Config file (default: ~/.config/hearth/bot.toml)
    #[arg(long, env = "HEARTH_CONFIG")]
    config: Option<PathBuf>,

    /// IRC server address (host:port)
    #[arg(long)]
    server: Option<String>,

    /// Bot nick
    #[arg(long)]
    nick: Option<String>,

    /// Channel to join (repeatable)
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Use TLS
    #[arg(long)]
    tls: bool,
}

impl Args {
    fn apply(&self, config: &mut BotConfig) {
        if let Some(server) = &self.server {
            config.host = server.clone();
        }
        if let Some(nick) = &self.nick {
            config.nick = nick.clone();
        }
        if self.tls {
            config.tls = true;
        }
        for channel in &self.channels {
            if !config.channels.iter().any(|c| c.name.eq_ignore_ascii_case(channel)) {
                config.channels.push(ChannelConfig::from(channel.as_str()));
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth_bot=info,hearth_sdk=info".into()),
        )
        .init();

    let args = Args::parse();
    let path = args.config.clone().unwrap_or_else(config::default_path);
    let mut config = BotConfig::load(&path)?;
    args.apply(&mut config);

    tracing::info!(
        name = %config.name,
        server = %config.host,
        nick = %config.nick,
        config = %path.display(),
        "Starting hearth-bot"
    );

    let (protocol, mut protocol_events) = IrcProtocol::new(config.connect_config());
    let ignores = Arc::new(IgnoreList::new(config.ignores.clone()));
    let (connection, events) =
        Connection::new(config.connection_settings(), protocol.clone(), ignores.clone());

    let authorizer = HostmaskAuthorizer::new(
        config.permissions.admins.clone(),
        config.permissions.users.clone(),
    )
    .with_lookups(connection.clone());
    let registry = CommandRegistry::new(PermissionPolicy::new(authorizer));
    register_builtins(&registry, &connection)
        .and_then(|()| register_ignore_command(&registry, &ignores))
        .context("Failed to register commands")?;
    let dispatcher = Dispatcher::new(Arc::new(registry));

    let router = tokio::spawn(dispatcher.run(events));

    connection.connect().await?;

    tracing::info!("Bot running. Ctrl+C to stop.");

    let mut channels = Some(config.channels.clone());
    loop {
        tokio::select! {
            event = protocol_events.recv() => {
                let Some(event) = event else {
                    tracing::warn!("Protocol event channel closed, exiting");
                    break;
                };
                connection.handle_event(event).await;
                match connection.state() {
                    ConnectionState::Connected => {
                        if let Some(channels) = channels.take() {
                            spawn_joins(&connection, channels);
                        }
                    }
                    ConnectionState::Disconnected => break,
                    ConnectionState::Connecting => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    connection.stop();
    router.abort();
    if let Err(e) = protocol.quit("hearth-bot shutting down").await {
        tracing::debug!(error = %e, "Quit failed");
    }
    Ok(())
}

fn spawn_joins(connection: &Connection, channels: Vec<ChannelConfig>) {
    for channel in channels {
        let connection = connection.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.join(&channel.name, channel.password.as_deref()).await {
                tracing::warn!(channel = %channel.name, error = %e, "Join failed");
            }
        });
    }
}
