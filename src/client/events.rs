use std::sync::{Arc, Mutex, Weak};

use super::lock;
use crate::types::Session;

/// Sign-in state changes announced by the [`AuthClient`](super::AuthClient).
///
/// Every event follows a backend response; none is synthesized from cached state.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    /// A recovery link was verified. The session it carries is only good for
    /// resetting the password and is not adopted as a sign-in.
    PasswordRecovery(Session),
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

/// Explicit subscriber list.
///
/// Listeners run synchronously, in subscription order, in the order events are
/// emitted. The list is snapshotted before delivery, so a listener may subscribe
/// or unsubscribe from inside a callback.
pub struct EventChannel<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> EventChannel<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Registers `listener` until the returned [`Subscription`] is dropped or
    /// [`unsubscribed`](Subscription::unsubscribe).
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, Arc::new(listener)));
            id
        };

        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    lock(&registry).listeners.retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = lock(&self.registry)
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }
}

impl<E: 'static> Default for EventChannel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventChannel<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

/// Unsubscribe handle. Dropping it removes the listener.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delivers_in_emission_order() {
        let channel = EventChannel::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = channel.subscribe(move |n| sink.lock().unwrap().push(*n));

        channel.emit(&1);
        channel.emit(&2);
        channel.emit(&3);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let channel = EventChannel::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let sub = channel.subscribe(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        channel.emit(&());
        drop(sub);
        channel.emit(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(channel.listener_count(), 0);
    }

    #[test]
    fn test_repeated_mounts_do_not_accumulate_listeners() {
        let channel = EventChannel::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = hits.clone();
            let sub = channel.subscribe(move |()| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            sub.unsubscribe();
        }
        let counter = hits.clone();
        let _live = channel.subscribe(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        channel.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(channel.listener_count(), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_delivery() {
        let channel = EventChannel::<()>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner = slot.clone();
        let sub = channel.subscribe(move |()| {
            inner.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        channel.emit(&());
        assert_eq!(channel.listener_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_channel_is_harmless() {
        let channel = EventChannel::<()>::new();
        let sub = channel.subscribe(|()| {});
        drop(channel);
        sub.unsubscribe();
    }
}
