//! Deciding whether a caller may run a command.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::commands::PermissionClass;
use crate::connection::Connection;
use crate::mask::mask_matches;
use crate::message::Sender;

/// Answers permission questions for one caller at a time.
///
/// May suspend, for instance to ask services who a caller is.
pub trait Authorizer: Send + Sync {
    fn authorize<'a>(&'a self, caller: &'a Sender, class: PermissionClass) -> BoxFuture<'a, bool>;
}

/// Approves everything.
pub struct OpenAuthorizer;

impl Authorizer for OpenAuthorizer {
    fn authorize<'a>(&'a self, _: &'a Sender, _: PermissionClass) -> BoxFuture<'a, bool> {
        futures::future::ready(true).boxed()
    }
}

/// Hostmask lists for admins and listed users; services accounts for
/// authenticated callers.
pub struct HostmaskAuthorizer {
    admins: Vec<String>,
    users: Vec<String>,
    identities: Option<Connection>,
}

impl HostmaskAuthorizer {
    pub fn new(admins: Vec<String>, users: Vec<String>) -> Self {
        HostmaskAuthorizer {
            admins,
            users,
            identities: None,
        }
    }

    /// Fall back to WHOIS on `connection` when a caller carries no account tag.
    pub fn with_lookups(mut self, connection: Connection) -> Self {
        self.identities = Some(connection);
        self
    }

    fn is_admin(&self, caller: &Sender) -> bool {
        self.admins.iter().any(|m| mask_matches(m, caller))
    }

    fn is_listed(&self, caller: &Sender) -> bool {
        self.is_admin(caller) || self.users.iter().any(|m| mask_matches(m, caller))
    }

    async fn is_authed(&self, caller: &Sender) -> bool {
        if caller.account.is_some() {
            return true;
        }
        let Some(connection) = &self.identities else {
            return false;
        };
        match connection.whois(&caller.nick).await {
            Ok(info) => info.account.is_some(),
            Err(e) => {
                warn!(nick = %caller.nick, "Identity lookup failed: {e:#}");
                false
            }
        }
    }
}

impl Authorizer for HostmaskAuthorizer {
    fn authorize<'a>(&'a self, caller: &'a Sender, class: PermissionClass) -> BoxFuture<'a, bool> {
        async move {
            match class {
                PermissionClass::AllowAll => true,
                PermissionClass::AllowAdmin => self.is_admin(caller),
                PermissionClass::AllowListedUsers => self.is_listed(caller),
                PermissionClass::AllowAuthed => self.is_authed(caller).await,
            }
        }
        .boxed()
    }
}

/// Shared handle on the installed [`Authorizer`].
#[derive(Clone)]
pub struct PermissionPolicy {
    authorizer: Arc<dyn Authorizer>,
}

impl PermissionPolicy {
    pub fn new(authorizer: impl Authorizer + 'static) -> Self {
        PermissionPolicy {
            authorizer: Arc::new(authorizer),
        }
    }

    pub fn allow_all() -> Self {
        Self::new(OpenAuthorizer)
    }

    /// `AllowAll` passes without consulting the authorizer.
    pub async fn check(&self, caller: &Sender, class: PermissionClass) -> bool {
        if class == PermissionClass::AllowAll {
            return true;
        }
        let allowed = self.authorizer.authorize(caller, class).await;
        debug!(caller = %caller.hostmask(), %class, allowed, "Permission check");
        allowed
    }
}
