//! Stock commands every bot gets.

use std::sync::Arc;

use chrono::Utc;

use crate::commands::{CommandError, CommandRegistry, PermissionClass, Reply};
use crate::connection::Connection;
use crate::mask::IgnoreList;
use crate::message::Sender;

/// Register `ping`, `uptime`, `whois`, `channels`, `join` and `broadcast`.
pub fn register_builtins(registry: &CommandRegistry, connection: &Connection) -> Result<(), CommandError> {
    registry.register("ping", |caller: Sender, _| async move { Ok(format!("{caller}: pong")) })?;

    let conn = connection.clone();
    registry.register("uptime", move |_, _| {
        let conn = conn.clone();
        async move { Ok(uptime(&conn)) }
    })?;

    let conn = connection.clone();
    registry.register_with("whois", PermissionClass::AllowAuthed, move |_, args: Vec<String>| {
        let conn = conn.clone();
        async move {
            let Some(nick) = args.first() else {
                return Ok(Reply::from("Usage: whois <nick>"));
            };
            Ok(match conn.whois(nick).await {
                Ok(info) => Reply::from(info.summary()),
                Err(e) => Reply::from(format!("{nick}: {e}")),
            })
        }
    })?;

    let conn = connection.clone();
    registry.register_with("channels", PermissionClass::AllowAdmin, move |_, _| {
        let channels = conn.channels();
        async move {
            Ok(if channels.is_empty() {
                "Not in any channels".to_string()
            } else {
                format!("Joined: {}", channels.join(", "))
            })
        }
    })?;

    let conn = connection.clone();
    registry.register_with("join", PermissionClass::AllowAdmin, move |_, args: Vec<String>| {
        let conn = conn.clone();
        async move {
            let Some(channel) = args.first() else {
                return Ok("Usage: join <channel> [password]".to_string());
            };
            let password = args.get(1).map(String::as_str);
            Ok(match conn.join(channel, password).await {
                Ok(()) => format!("Joined {channel}"),
                Err(e) => format!("Could not join {channel}: {e}"),
            })
        }
    })?;

    let conn = connection.clone();
    registry.register_with("broadcast", PermissionClass::AllowAdmin, move |_, args: Vec<String>| {
        let conn = conn.clone();
        async move {
            if args.is_empty() {
                return Ok(Reply::from("Usage: broadcast <text>"));
            }
            conn.broadcast(&args.join(" "));
            Ok(Reply::none())
        }
    })?;

    Ok(())
}

/// Register the admin-only `ignore` command, editing `ignores` in place.
pub fn register_ignore_command(
    registry: &CommandRegistry,
    ignores: &Arc<IgnoreList>,
) -> Result<(), CommandError> {
    let ignores = ignores.clone();
    registry.register_with("ignore", PermissionClass::AllowAdmin, move |_, args: Vec<String>| {
        let reply = edit_ignores(&ignores, &args);
        async move { Ok(reply) }
    })
}

fn edit_ignores(ignores: &IgnoreList, args: &[String]) -> String {
    match (args.first().map(String::as_str), args.get(1)) {
        (Some("add"), Some(mask)) => {
            if ignores.add(mask) {
                format!("Ignoring {mask}")
            } else {
                format!("Already ignoring {mask}")
            }
        }
        (Some("remove"), Some(mask)) => {
            if ignores.remove(mask) {
                format!("No longer ignoring {mask}")
            } else {
                format!("Not ignoring {mask}")
            }
        }
        (Some("list"), None) => {
            let masks = ignores.masks();
            if masks.is_empty() {
                "Ignore list is empty".to_string()
            } else {
                format!("Ignoring: {}", masks.join(", "))
            }
        }
        _ => "Usage: ignore add|remove <mask>, or ignore list".to_string(),
    }
}

fn uptime(conn: &Connection) -> String {
    let Some(since) = conn.connected_since() else {
        return "Not connected".to_string();
    };
    let secs = (Utc::now() - since).num_seconds().max(0);
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (mins, secs) = (rem / 60, rem % 60);
    let server = conn.server().unwrap_or_else(|| conn.host().to_string());
    format!(
        "Connected to {server} since {} ({days}d {hours}h {mins}m {secs}s)",
        since.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
