//! Turns command lines into replies.
//!
//! Every error a dispatch can produce ends here as a reply to the caller and
//! a log line. Nothing propagates into the event loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::commands::{CommandError, CommandRegistry, Reply};
use crate::connection::ConnectionEvent;
use crate::message::InboundMessage;

pub const GENERIC_FAILURE: &str = "Sorry, something went wrong running that command.";

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Dispatcher { registry }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Run the command in `message` and queue whatever it answers.
    pub async fn dispatch(&self, message: InboundMessage) {
        let Some(name) = message.command_name() else {
            return;
        };
        if name.is_empty() {
            return;
        }

        let caller = message.sender().clone();
        let reply = match self.registry.dispatch(name, caller, message.args()).await {
            Ok(reply) => reply,
            Err(e) => failure_reply(&e),
        };
        message.reply(reply);
    }

    /// Dispatch on a task of its own so a slow permission check or handler
    /// holds up only this command.
    pub fn spawn(&self, message: InboundMessage) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch(message).await })
    }

    /// Route classified events until every sender is gone. Must not share a
    /// task with the loop feeding [`Connection::handle_event`], which waits
    /// whenever the event buffer is full.
    ///
    /// [`Connection::handle_event`]: crate::connection::Connection::handle_event
    pub async fn run(self, mut events: mpsc::Receiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Command(message) => {
                    self.spawn(message);
                }
                ConnectionEvent::Message(message) => {
                    debug!(
                        from = %message.sender(),
                        target = %message.target(),
                        "{}",
                        message.content()
                    );
                }
            }
        }
    }
}

fn failure_reply(err: &CommandError) -> Reply {
    match err {
        CommandError::UnknownCommand(name) => {
            debug!(command = %name, "Unknown command");
            Reply::from(err.to_string())
        }
        CommandError::PermissionDenied {
            caller,
            command,
            required,
        } => {
            info!(%caller, %command, %required, "Permission denied");
            Reply::from(format!(
                "{caller}: you don't have permission to use {command} ({required} only)"
            ))
        }
        CommandError::Execution { command, source } => {
            error!(%command, "Command failed: {source:#}");
            Reply::from(GENERIC_FAILURE)
        }
        CommandError::DuplicateCommand(_) => Reply::none(),
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use futures::future::BoxFuture;

    use super::*;
    use crate::commands::PermissionClass;
    use crate::message::Sender;
    use crate::permission::{Authorizer, PermissionPolicy};
    use crate::testing::{self, RecordingProtocol};

    struct AdminsAreNamedRoot;

    impl Authorizer for AdminsAreNamedRoot {
        fn authorize<'a>(&'a self, caller: &'a Sender, _: PermissionClass) -> BoxFuture<'a, bool> {
            futures::future::ready(caller.nick == "root").boxed()
        }
    }

    fn dispatcher() -> Dispatcher {
        let registry = CommandRegistry::new(PermissionPolicy::new(AdminsAreNamedRoot));
        registry
            .register_with("reboot", PermissionClass::AllowAdmin, |_, _| async { Ok("rebooting") })
            .unwrap();
        registry
            .register("fail", |_, _| async {
                Err::<(), _>(anyhow::anyhow!("secret database password leaked"))
            })
            .unwrap();
        registry
            .register("quiet", |_, _| async { Ok(()) })
            .unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    async fn run(nick: &str, target: &str, content: &str) -> Vec<(String, String)> {
        let (conn, _events, protocol): (_, _, Arc<RecordingProtocol>) = testing::connection();
        let message = InboundMessage::new(Sender::new(nick), target, content, conn);
        dispatcher().dispatch(message).await;
        testing::drain(2).await;
        protocol.sent()
    }

    #[tokio::test(start_paused = true)]
    async fn help_replies_in_channel() {
        let sent = run("alice", "#room", "!help").await;
        assert_eq!(
            sent,
            vec![(
                "#room".to_string(),
                "Available commands: fail, help, quiet, reboot".to_string()
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_command_is_named() {
        let sent = run("alice", "hearth", "!frobnicate now").await;
        assert_eq!(
            sent,
            vec![("alice".to_string(), "Unknown command 'frobnicate'".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn denial_and_approval() {
        let denied = run("mallory", "#room", "!reboot").await;
        assert_eq!(denied.len(), 1);
        assert!(denied[0].1.contains("permission"));

        let approved = run("root", "#room", "!reboot").await;
        assert_eq!(approved, vec![("#room".to_string(), "rebooting".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn handler_failure_hides_details() {
        let sent = run("alice", "#room", "!fail").await;
        assert_eq!(sent, vec![("#room".to_string(), GENERIC_FAILURE.to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_replies_and_bare_prefix_send_nothing() {
        assert!(run("alice", "#room", "!quiet").await.is_empty());
        assert!(run("alice", "#room", "!").await.is_empty());
        assert!(run("alice", "#room", "plain chat").await.is_empty());
    }
}
