//! Command registry and permission-gated dispatch.
//!
//! A [`CommandRegistry`] maps names to immutable [`Command`] records. Every
//! registry starts with a built-in `help` that lists the names registered at
//! the moment it runs. [`CommandRegistry::dispatch`] checks the caller
//! against the command's [`PermissionClass`] before the handler is touched.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::message::Sender;
use crate::permission::PermissionPolicy;

/// Access tier a command requires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PermissionClass {
    /// Anyone.
    #[default]
    AllowAll,
    /// Bot administrators only.
    AllowAdmin,
    /// Users logged in to services.
    AllowAuthed,
    /// Users named in configuration.
    AllowListedUsers,
}

impl fmt::Display for PermissionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermissionClass::AllowAll => "everyone",
            PermissionClass::AllowAdmin => "admin",
            PermissionClass::AllowAuthed => "authenticated users",
            PermissionClass::AllowListedUsers => "listed users",
        })
    }
}

/// Lines a handler wants sent back, in order. Empty means stay silent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply(Vec<String>);

impl Reply {
    pub fn none() -> Self {
        Reply(Vec::new())
    }

    pub fn lines(&self) -> &[String] {
        &self.0
    }

    pub fn into_lines(self) -> Vec<String> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Reply {
    fn from(line: String) -> Self {
        Reply(vec![line])
    }
}

impl From<&str> for Reply {
    fn from(line: &str) -> Self {
        Reply(vec![line.to_string()])
    }
}

impl From<Vec<String>> for Reply {
    fn from(lines: Vec<String>) -> Self {
        Reply(lines)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::none()
    }
}

/// Type-erased command handler.
pub type Handler =
    Arc<dyn Fn(Sender, Vec<String>) -> BoxFuture<'static, anyhow::Result<Reply>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command {0} is already registered")]
    DuplicateCommand(String),
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{caller} may not use {command}: requires {required}")]
    PermissionDenied {
        caller: String,
        command: String,
        required: PermissionClass,
    },
    #[error("Command {command} failed")]
    Execution {
        command: String,
        #[source]
        source: anyhow::Error,
    },
}

/// An immutable registration record.
#[derive(Clone)]
pub struct Command {
    name: String,
    permission: PermissionClass,
    handler: Handler,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("permission", &self.permission)
            .finish_non_exhaustive()
    }
}

impl Command {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permission(&self) -> PermissionClass {
        self.permission
    }

    /// Run the handler without any permission check.
    pub fn execute(&self, caller: Sender, args: Vec<String>) -> BoxFuture<'static, anyhow::Result<Reply>> {
        (self.handler)(caller, args)
    }
}

type CommandMap = RwLock<BTreeMap<String, Command>>;

pub struct CommandRegistry {
    commands: Arc<CommandMap>,
    policy: PermissionPolicy,
}

impl CommandRegistry {
    /// Empty registry apart from the built-in `help`.
    pub fn new(policy: PermissionPolicy) -> Self {
        let commands: Arc<CommandMap> = Arc::default();
        let registry = CommandRegistry { commands, policy };

        let names = Arc::downgrade(&registry.commands);
        let help: Handler = Arc::new(move |_: Sender, _: Vec<String>| {
            let line = help_line(&names);
            futures::future::ready(anyhow::Ok(Reply::from(line))).boxed()
        });
        registry.commands.write().insert(
            "help".to_string(),
            Command {
                name: "help".to_string(),
                permission: PermissionClass::AllowAll,
                handler: help,
            },
        );
        registry
    }

    /// Register `handler` under `name`, open to everyone.
    pub fn register<F, Fut, R>(&self, name: &str, handler: F) -> Result<(), CommandError>
    where
        F: Fn(Sender, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.register_with(name, PermissionClass::AllowAll, handler)
    }

    /// Register `handler` under `name`, gated by `permission`.
    ///
    /// Fails with [`CommandError::DuplicateCommand`] and leaves the registry
    /// untouched if `name` is taken. Names are case-sensitive.
    pub fn register_with<F, Fut, R>(
        &self,
        name: &str,
        permission: PermissionClass,
        handler: F,
    ) -> Result<(), CommandError>
    where
        F: Fn(Sender, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        let mut commands = self.commands.write();
        if commands.contains_key(name) {
            return Err(CommandError::DuplicateCommand(name.to_string()));
        }
        let handler: Handler = Arc::new(move |caller: Sender, args: Vec<String>| {
            handler(caller, args)
                .map(|r| r.map(Into::<Reply>::into))
                .boxed()
        });
        commands.insert(
            name.to_string(),
            Command {
                name: name.to_string(),
                permission,
                handler,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Command, CommandError> {
        self.commands
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))
    }

    /// Registered names in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        self.commands.read().keys().cloned().collect()
    }

    /// Look up `name`, check `caller` against it, then run it.
    ///
    /// The permission check always completes before the handler starts, and
    /// a denied caller never reaches the handler.
    pub async fn dispatch(
        &self,
        name: &str,
        caller: Sender,
        args: Vec<String>,
    ) -> Result<Reply, CommandError> {
        let command = self.lookup(name)?;

        if !self.policy.check(&caller, command.permission()).await {
            return Err(CommandError::PermissionDenied {
                caller: caller.nick,
                command: command.name,
                required: command.permission,
            });
        }

        command
            .execute(caller, args)
            .await
            .map_err(|source| CommandError::Execution {
                command: name.to_string(),
                source,
            })
    }
}

fn help_line(commands: &Weak<CommandMap>) -> String {
    let names: Vec<String> = commands
        .upgrade()
        .map(|c| c.read().keys().cloned().collect())
        .unwrap_or_default();
    format!("Available commands: {}", names.join(", "))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::permission::{Authorizer, PermissionPolicy};

    struct DenyAll;

    impl Authorizer for DenyAll {
        fn authorize<'a>(&'a self, _: &'a Sender, _: PermissionClass) -> BoxFuture<'a, bool> {
            futures::future::ready(false).boxed()
        }
    }

    fn registry() -> CommandRegistry {
        CommandRegistry::new(PermissionPolicy::allow_all())
    }

    fn caller() -> Sender {
        Sender::new("alice")
    }

    #[tokio::test]
    async fn help_lists_sorted_names() {
        let registry = registry();
        registry.register("foo", |_, _| async { Ok("foo") }).unwrap();
        registry.register("bar", |_, _| async { Ok("bar") }).unwrap();

        let reply = registry.dispatch("help", caller(), vec![]).await.unwrap();
        assert_eq!(reply.lines(), ["Available commands: bar, foo, help"]);
    }

    #[tokio::test]
    async fn help_reflects_later_registrations() {
        let registry = registry();
        let before = registry.dispatch("help", caller(), vec![]).await.unwrap();
        assert_eq!(before.lines(), ["Available commands: help"]);

        registry.register("zap", |_, _| async { Ok(()) }).unwrap();
        let after = registry.dispatch("help", caller(), vec![]).await.unwrap();
        assert_eq!(after.lines(), ["Available commands: help, zap"]);
    }

    #[test]
    fn duplicate_registration_fails_and_keeps_original() {
        let registry = registry();
        registry
            .register_with("op", PermissionClass::AllowAdmin, |_, _| async { Ok(()) })
            .unwrap();

        let err = registry
            .register("op", |_, _| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, CommandError::DuplicateCommand(ref n) if n == "op"));
        assert_eq!(
            registry.lookup("op").unwrap().permission(),
            PermissionClass::AllowAdmin
        );
        assert!(matches!(
            registry.register("help", |_, _| async { Ok(()) }),
            Err(CommandError::DuplicateCommand(_))
        ));
    }

    #[test]
    fn lookup_returns_each_registered_command() {
        let registry = registry();
        for (name, class) in [
            ("a", PermissionClass::AllowAll),
            ("b", PermissionClass::AllowAuthed),
            ("c", PermissionClass::AllowListedUsers),
        ] {
            registry.register_with(name, class, |_, _| async { Ok(()) }).unwrap();
        }
        assert_eq!(registry.lookup("b").unwrap().permission(), PermissionClass::AllowAuthed);
        assert_eq!(registry.lookup("c").unwrap().name(), "c");
        assert_eq!(registry.names(), vec!["a", "b", "c", "help"]);
    }

    #[test]
    fn names_are_case_sensitive() {
        let registry = registry();
        registry.register("Ping", |_, _| async { Ok(()) }).unwrap();
        registry.register("ping", |_, _| async { Ok(()) }).unwrap();
        assert!(matches!(
            registry.lookup("PING"),
            Err(CommandError::UnknownCommand(ref n)) if n == "PING"
        ));
    }

    #[tokio::test]
    async fn handler_receives_caller_and_args() {
        let registry = registry();
        registry
            .register("echo", |caller: Sender, args: Vec<String>| async move {
                Ok(format!("{}: {}", caller.nick, args.join(" ")))
            })
            .unwrap();
        let reply = registry
            .dispatch("echo", caller(), vec!["hi".into(), "there".into()])
            .await
            .unwrap();
        assert_eq!(reply.lines(), ["alice: hi there"]);
    }

    #[tokio::test]
    async fn denied_caller_never_reaches_handler() {
        let registry = CommandRegistry::new(PermissionPolicy::new(DenyAll));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register_with("shutdown", PermissionClass::AllowAdmin, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .unwrap();

        let err = registry.dispatch("shutdown", caller(), vec![]).await.unwrap_err();
        match err {
            CommandError::PermissionDenied { caller, command, required } => {
                assert_eq!(caller, "alice");
                assert_eq!(command, "shutdown");
                assert_eq!(required, PermissionClass::AllowAdmin);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // AllowAll never consults the authorizer.
        assert!(registry.dispatch("help", caller(), vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn handler_failure_is_wrapped() {
        let registry = registry();
        registry
            .register("boom", |_, _| async {
                Err::<(), _>(anyhow::anyhow!("disk on fire"))
            })
            .unwrap();
        let err = registry.dispatch("boom", caller(), vec![]).await.unwrap_err();
        match err {
            CommandError::Execution { command, source } => {
                assert_eq!(command, "boom");
                assert_eq!(source.to_string(), "disk on fire");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_command_names_the_request() {
        let err = registry().dispatch("nope", caller(), vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown command 'nope'");
    }
}
