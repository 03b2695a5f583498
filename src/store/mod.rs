//! Client-side session store.
//!
//! Holds the identity of one browser tab and drives the
//! `Uninitialized → Loading → Authenticated | Unauthenticated` state machine.
//! Trust is tiered: the durable mirror only feeds the first paint while
//! `Loading`; every transition follows a backend answer.

mod cache;

use std::sync::{Arc, Mutex, Weak};

pub use cache::{CACHE_KEY, DurableCache, MemoryCache};
use cache::CacheMirror;

use crate::backend::AuthBackend;
use crate::client::{AuthClient, AuthEvent, EventChannel, Subscription, lock};
use crate::error::Error;
use crate::types::{Session, User};

/// Sign-in state of the tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Not mounted yet.
    Uninitialized,
    /// Waiting for the backend. Render a neutral state, never "signed out".
    Loading,
    Authenticated,
    Unauthenticated,
}

impl AuthState {
    /// The only transitions the store performs.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Loading)
                | (Self::Loading, Self::Authenticated)
                | (Self::Loading, Self::Unauthenticated)
                | (Self::Authenticated, Self::Unauthenticated)
                | (Self::Unauthenticated, Self::Authenticated)
        )
    }
}

/// Delivered to [`SessionStore::on_change`] listeners on every transition.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub state: AuthState,
    /// Confirmed user when `state` is `Authenticated`.
    pub user: Option<User>,
}

struct Snapshot {
    state: AuthState,
    session: Option<Session>,
    cached_user: Option<User>,
}

struct StoreInner<B> {
    client: Arc<AuthClient<B>>,
    mirror: CacheMirror,
    snapshot: Mutex<Snapshot>,
    changes: EventChannel<StateChange>,
    auth_events: Mutex<Option<Subscription>>,
}

/// Session store of one tab. Cheap to clone; clones share state.
pub struct SessionStore<B> {
    inner: Arc<StoreInner<B>>,
}

impl<B> Clone for SessionStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: AuthBackend> SessionStore<B> {
    #[must_use]
    pub fn new(client: Arc<AuthClient<B>>, cache: Arc<dyn DurableCache>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                client,
                mirror: CacheMirror::new(cache),
                snapshot: Mutex::new(Snapshot {
                    state: AuthState::Uninitialized,
                    session: None,
                    cached_user: None,
                }),
                changes: EventChannel::new(),
                auth_events: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn client(&self) -> &Arc<AuthClient<B>> {
        &self.inner.client
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        lock(&self.inner.snapshot).state
    }

    /// Backend-confirmed user, only while `Authenticated`.
    #[must_use]
    pub fn user(&self) -> Option<User> {
        let snapshot = lock(&self.inner.snapshot);
        match snapshot.state {
            AuthState::Authenticated => snapshot.session.as_ref().map(|s| s.user.clone()),
            _ => None,
        }
    }

    /// User from the durable mirror, for first paint only: `None` once the
    /// backend has answered.
    #[must_use]
    pub fn cached_user(&self) -> Option<User> {
        let snapshot = lock(&self.inner.snapshot);
        match snapshot.state {
            AuthState::Loading => snapshot.cached_user.clone(),
            _ => None,
        }
    }

    /// Current session from the backend client, or `None`. Never fails.
    pub async fn get_session(&self) -> Option<Session> {
        match self.inner.client.get_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed, treating as signed out");
                None
            }
        }
    }

    /// Registers a listener for state transitions.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.inner.changes.subscribe(listener)
    }

    /// Mounts the store: `Uninitialized → Loading`, reads the mirror for first
    /// paint, subscribes to the client's auth events once, then confirms with
    /// the backend.
    ///
    /// Mounting an already mounted store does nothing.
    pub async fn mount(&self) {
        {
            let mut slot = lock(&self.inner.auth_events);
            if slot.is_some() {
                tracing::debug!("Session store already mounted");
                return;
            }
            let weak: Weak<StoreInner<B>> = Arc::downgrade(&self.inner);
            *slot = Some(self.inner.client.on_auth_state_change(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_auth_event(event);
                }
            }));
        }

        let cached_user = self.inner.mirror.load().map(|s| s.user);
        let change = {
            let mut snapshot = lock(&self.inner.snapshot);
            snapshot.cached_user = cached_user;
            transition(&mut snapshot, AuthState::Loading)
        };
        self.inner.publish(change);

        self.refresh_session().await;
    }

    /// Unsubscribes from the client's auth events. State is kept.
    pub fn unmount(&self) {
        lock(&self.inner.auth_events).take();
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        lock(&self.inner.auth_events).is_some()
    }

    /// Re-validates the session with the backend.
    ///
    /// A session found in cookies is confirmed with a second round-trip
    /// (`get_user`) before the store trusts it. Any failure ends
    /// `Unauthenticated`; the store never stays `Loading`.
    pub async fn refresh_session(&self) {
        if self.state() == AuthState::Uninitialized {
            let change = transition(&mut lock(&self.inner.snapshot), AuthState::Loading);
            self.inner.publish(change);
        }

        match self.confirm().await {
            Ok(Some(session)) => self.inner.adopt(session),
            Ok(None) => self.inner.invalidate(),
            Err(e) => {
                tracing::warn!(error = %e, "Session refresh failed, treating as signed out");
                self.inner.invalidate();
            }
        }
    }

    /// Takes a session the backend just confirmed (e.g. on the auth callback).
    pub fn adopt(&self, session: Session) {
        self.inner.adopt(session);
    }

    /// Signs out: backend revocation (best effort), cookies and mirror cleared,
    /// exactly one change to `Unauthenticated`.
    pub async fn sign_out(&self) {
        self.inner.client.sign_out().await;
        // Covers the unmounted case; a no-op if the SignedOut event already ran.
        self.inner.invalidate();
    }

    async fn confirm(&self) -> Result<Option<Session>, Error> {
        let Some(session) = self.inner.client.get_session().await? else {
            return Ok(None);
        };
        Ok(self
            .inner
            .client
            .confirm_user(&session)
            .await?
            .map(|user| Session { user, ..session }))
    }
}

impl<B: AuthBackend> StoreInner<B> {
    fn handle_auth_event(&self, event: &AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                self.adopt(session.clone());
            }
            AuthEvent::SignedOut => self.invalidate(),
            AuthEvent::PasswordRecovery(_) => {
                tracing::debug!("Recovery session not adopted as a sign-in");
            }
        }
    }

    fn adopt(&self, session: Session) {
        if session.is_expired() {
            tracing::debug!("Refusing to adopt an expired session");
            self.invalidate();
            return;
        }

        let change = {
            let mut snapshot = lock(&self.snapshot);
            if snapshot.state == AuthState::Uninitialized {
                // Adopting before mount: pass through Loading silently.
                snapshot.state = AuthState::Loading;
            }
            self.mirror.save(&session);
            snapshot.session = Some(session);
            snapshot.cached_user = None;
            transition(&mut snapshot, AuthState::Authenticated)
        };
        self.publish(change);
    }

    fn invalidate(&self) {
        self.mirror.clear();
        let change = {
            let mut snapshot = lock(&self.snapshot);
            if snapshot.state == AuthState::Uninitialized {
                snapshot.state = AuthState::Loading;
            }
            snapshot.session = None;
            snapshot.cached_user = None;
            transition(&mut snapshot, AuthState::Unauthenticated)
        };
        self.publish(change);
    }

    fn publish(&self, change: Option<StateChange>) {
        if let Some(change) = change {
            self.changes.emit(&change);
        }
    }
}

/// Moves to `next` if that is a transition; staying put is silent.
fn transition(snapshot: &mut Snapshot, next: AuthState) -> Option<StateChange> {
    if snapshot.state == next {
        return None;
    }
    if !snapshot.state.can_transition_to(next) {
        tracing::warn!(from = ?snapshot.state, to = ?next, "Ignoring invalid auth state transition");
        return None;
    }
    snapshot.state = next;
    let user = match next {
        AuthState::Authenticated => snapshot.session.as_ref().map(|s| s.user.clone()),
        _ => None,
    };
    Some(StateChange { state: next, user })
}
