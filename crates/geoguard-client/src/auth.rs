//! Contract with the authentication collaborator.
//!
//! The tracker never talks to the identity provider itself: it only needs the
//! current user, a stream of auth-state changes, and the admin check.

use tokio::sync::watch;

use geoguard_shared::types::email_local_part;
use geoguard_shared::AdminPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            display_name: None,
        }
    }

    /// The identity's display name, or the local part of the email.
    pub fn fallback_name(&self) -> String {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => email_local_part(&self.email).to_string(),
        }
    }
}

pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    /// Auth-state stream; the value is `None` while signed out.
    fn subscribe(&self) -> watch::Receiver<Option<AuthUser>>;

    fn is_admin(&self, user: &AuthUser) -> bool;
}

/// Auth state pushed in by the embedding application (or a test).
pub struct SharedAuth {
    state: watch::Sender<Option<AuthUser>>,
    admins: AdminPolicy,
}

impl SharedAuth {
    pub fn new(admins: AdminPolicy) -> Self {
        let (state, _) = watch::channel(None);
        Self { state, admins }
    }

    pub fn signed_in(user: AuthUser, admins: AdminPolicy) -> Self {
        let auth = Self::new(admins);
        auth.sign_in(user);
        auth
    }

    pub fn sign_in(&self, user: AuthUser) {
        tracing::info!(user = %user.id, "signed in");
        self.state.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        if let Some(user) = self.state.send_replace(None) {
            tracing::info!(user = %user.id, "signed out");
        }
    }
}

impl AuthProvider for SharedAuth {
    fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }

    fn is_admin(&self, user: &AuthUser) -> bool {
        self.admins.is_admin(&user.email)
    }
}
