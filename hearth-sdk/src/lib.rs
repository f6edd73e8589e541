//! hearth-sdk: a small IRC client.
//!
//! [`client`] owns the socket and runs the protocol in a spawned task,
//! handing back a [`client::ClientHandle`] for commands and a stream of
//! [`event::Event`]s. [`irc`] holds the line format.

pub mod client;
pub mod event;
pub mod irc;
