//! ==============================================================================
//! session.rs - per-session identity and context
//! ==============================================================================
//!
//! identity channels, per session:
//!
//!     Anonymous --set_guest_name(non-empty)--> GuestNamed --reset_guest_name--> Anonymous
//!     Anonymous / GuestNamed --sign_in--> Authenticated --sign_out--> Anonymous
//!
//!     - while signed in, the account and the guest nickname are separate
//!       channels; the ui surface that triggered a write picks which one
//!       attributes it
//!     - sign_out clears both channels
//!     - a rejected transition leaves the state untouched
//!     - nothing here outlives the process
//!
//! a SessionContext bundles the identity with that session's series cache and
//! its bulletin-board login; every operation takes the context explicitly.
//! SessionRegistry hands out ids for contexts and drops idle ones.
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthProvider, AuthUser};
use crate::bulletin::Member;
use crate::cache::SeriesCache;
use crate::error::{AuthError, ValidationError, WriteError};

pub const MIN_PASSWORD_LEN: usize = 6;

/// name used when an account carries no display name
pub const FALLBACK_DISPLAY_NAME: &str = "Anonymous";

/// who is posting
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Anonymous,
    Guest { display_name: String },
    Authenticated { id: String, display_name: String },
}

impl Identity {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::Authenticated { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            Identity::Anonymous => None,
            Identity::Guest { display_name } | Identity::Authenticated { display_name, .. } => Some(display_name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Anonymous,
    GuestNamed,
    Authenticated,
}

/// which surface a write came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Guest,
    Account,
}

#[derive(Debug, Default)]
pub struct Session {
    account: Option<AuthUser>,
    guest_name: Option<String>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        if self.account.is_some() {
            SessionState::Authenticated
        } else if self.guest_name.is_some() {
            SessionState::GuestNamed
        } else {
            SessionState::Anonymous
        }
    }

    pub fn account(&self) -> Option<&AuthUser> {
        self.account.as_ref()
    }

    pub fn guest_name(&self) -> Option<&str> {
        self.guest_name.as_deref()
    }

    pub fn identity(&self, channel: Channel) -> Identity {
        match channel {
            Channel::Account => match &self.account {
                Some(user) => Identity::Authenticated {
                    id: user.id.clone(),
                    display_name: user
                        .display_name
                        .clone()
                        .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string()),
                },
                None => Identity::Anonymous,
            },
            Channel::Guest => match &self.guest_name {
                Some(name) => Identity::Guest { display_name: name.clone() },
                None => Identity::Anonymous,
            },
        }
    }

    pub fn set_guest_name(&mut self, name: &str) -> Result<(), ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyGuestName);
        }
        self.guest_name = Some(name.to_string());
        Ok(())
    }

    pub fn reset_guest_name(&mut self) {
        self.guest_name = None;
    }

    /// creates an account; the session stays signed out until sign_in
    pub async fn sign_up(
        &self,
        auth: &dyn AuthProvider,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthUser, WriteError> {
        if email.trim().is_empty() {
            return Err(ValidationError::MissingField("email").into());
        }
        if display_name.trim().is_empty() {
            return Err(ValidationError::MissingField("display name").into());
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort { min: MIN_PASSWORD_LEN }.into());
        }
        let user = auth.sign_up(email.trim(), password, display_name.trim()).await?;
        info!(user_id = %user.id, "account created");
        Ok(user)
    }

    pub async fn sign_in(
        &mut self,
        auth: &dyn AuthProvider,
        email: &str,
        password: &str,
    ) -> Result<&AuthUser, WriteError> {
        if email.trim().is_empty() {
            return Err(ValidationError::MissingField("email").into());
        }
        if password.is_empty() {
            return Err(ValidationError::MissingField("password").into());
        }
        let user = auth.sign_in(email.trim(), password).await?;
        info!(user_id = %user.id, "signed in");
        Ok(self.account.insert(user))
    }

    /// always ends Anonymous, guest name included; a provider failure is
    /// still reported so it can be shown
    pub async fn sign_out(&mut self, auth: &dyn AuthProvider) -> Result<(), AuthError> {
        let Some(user) = self.account.take() else {
            return Ok(());
        };
        self.guest_name = None;
        auth.sign_out(&user).await.map_err(|e| {
            warn!(user_id = %user.id, error = %e, "provider sign-out failed");
            e
        })
    }
}

/// everything scoped to one interactive session
#[derive(Default)]
pub struct SessionContext {
    pub session: Session,
    pub cache: SeriesCache,
    /// bulletin-board login, separate from the account channel
    pub member: Option<Member>,
}

impl SessionContext {
    pub fn new(cache: SeriesCache) -> Self {
        Self { session: Session::default(), cache, member: None }
    }
}

pub type SharedContext = Arc<Mutex<SessionContext>>;

struct SessionSlot {
    context: SharedContext,
    last_seen: Instant,
}

/// live session contexts by id, bounded by idle time and count
pub struct SessionRegistry {
    idle: Duration,
    capacity: usize,
    slots: HashMap<Uuid, SessionSlot>,
}

impl SessionRegistry {
    pub fn new(idle: Duration, capacity: usize) -> Self {
        Self { idle, capacity: capacity.max(1), slots: HashMap::new() }
    }

    /// registers a context; idle sessions are swept first and, when still
    /// full, the least recently seen one is dropped
    pub fn open(&mut self, context: SessionContext) -> Uuid {
        let now = Instant::now();
        self.sweep(now);
        if self.slots.len() >= self.capacity {
            let oldest = self.slots.iter().min_by_key(|(_, slot)| slot.last_seen).map(|(id, _)| *id);
            if let Some(id) = oldest {
                self.slots.remove(&id);
                debug!(session = %id, "session evicted, registry full");
            }
        }
        let id = Uuid::new_v4();
        self.slots.insert(id, SessionSlot { context: Arc::new(Mutex::new(context)), last_seen: now });
        id
    }

    /// the context for `id`, refreshing its idle timer; expired ids are dropped
    pub fn get(&mut self, id: &Uuid) -> Option<SharedContext> {
        let now = Instant::now();
        let slot = self.slots.get_mut(id)?;
        if now.duration_since(slot.last_seen) >= self.idle {
            self.slots.remove(id);
            debug!(session = %id, "session expired");
            return None;
        }
        slot.last_seen = now;
        Some(slot.context.clone())
    }

    pub fn close(&mut self, id: &Uuid) -> bool {
        self.slots.remove(id).is_some()
    }

    fn sweep(&mut self, now: Instant) {
        let idle = self.idle;
        let before = self.slots.len();
        self.slots.retain(|_, slot| now.duration_since(slot.last_seen) < idle);
        let swept = before - self.slots.len();
        if swept > 0 {
            debug!(swept, "idle sessions dropped");
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
