//! hearth-bot: a command-driven IRC bot runtime.
//!
//! Inbound lines are classified by a [`connection::Connection`], commands
//! are checked and run by a [`commands::CommandRegistry`], and every reply
//! leaves through a rate-limited [`queue::OutboundQueue`].

pub mod builtins;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod identity;
pub mod irc;
pub mod mask;
pub mod message;
pub mod permission;
pub mod protocol;
pub mod queue;

#[cfg(test)]
mod testing;
