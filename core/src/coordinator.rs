//! Deduplicated recovery: one recovery action per failure class.
//!
//! # Overview
//! When several calls fail for the same underlying cause (an expired token,
//! an overloaded upstream), only the first one runs the recovery action. The
//! rest queue behind it and all of them are released together, in the order
//! they arrived, with the action's outcome.
//!
//! # Design
//! The waiter map is the only shared mutable state in the orchestrator. It is
//! touched through two primitives, each a single critical section:
//! - `enqueue`: check-then-insert-or-append.
//! - `resolve`: remove-and-snapshot the whole waiter list for a key.
//!
//! The lock is a `std::sync::Mutex` that is never held across an `.await`,
//! and completions are invoked after it is released so a completion may
//! safely start a new cycle for the same key.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError, Weak};

use tokio::sync::oneshot;

/// Completion invoked once with the outcome of a recovery cycle.
pub type RecoveryCompletion = Box<dyn FnOnce(bool) + Send>;

/// Informational hooks fired by a `RecoveryCoordinator`.
///
/// Observers are registered as `Weak` references: the coordinator never
/// keeps one alive, and hooks stop firing once the observer is dropped.
pub trait RecoveryObserver<K>: Send + Sync {
    /// A first failure started a new recovery cycle for `key`.
    fn recovery_started(&self, _key: &K) {}

    /// A failure joined the in-flight cycle for `key` at `position` (0 is the
    /// cycle's leader).
    fn recovery_enqueued(&self, _key: &K, _position: usize) {}

    /// The cycle for `key` resolved and its waiters were released.
    fn recovery_finished(&self, _key: &K, _recovered: bool) {}
}

/// Role of a caller after `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// No cycle was in flight: the caller must run the recovery action and
    /// then `resolve` the key.
    Leader,
    /// A cycle was already in flight; the completion will be invoked when it
    /// resolves.
    Joined { position: usize },
}

pub struct RecoveryCoordinator<K> {
    pending: Mutex<HashMap<K, Vec<RecoveryCompletion>>>,
    observer: Option<Weak<dyn RecoveryObserver<K>>>,
}

impl<K> Default for RecoveryCoordinator<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> RecoveryCoordinator<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Weak<dyn RecoveryObserver<K>>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn notify(&self, hook: impl FnOnce(&dyn RecoveryObserver<K>)) {
        if let Some(observer) = self.observer.as_ref().and_then(Weak::upgrade) {
            hook(observer.as_ref());
        }
    }

    /// Register `completion` for `key`, reporting whether the caller leads a
    /// new cycle or joined the one in flight.
    pub fn enqueue(&self, key: K, completion: RecoveryCompletion) -> Enqueued {
        let role = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.get_mut(&key) {
                Some(waiters) => {
                    waiters.push(completion);
                    Enqueued::Joined {
                        position: waiters.len() - 1,
                    }
                }
                None => {
                    pending.insert(key.clone(), vec![completion]);
                    Enqueued::Leader
                }
            }
        };

        match role {
            Enqueued::Leader => {
                tracing::debug!(key = ?key, "recovery started");
                self.notify(|o| {
                    o.recovery_started(&key);
                    o.recovery_enqueued(&key, 0);
                });
            }
            Enqueued::Joined { position } => {
                tracing::debug!(key = ?key, position, "joined in-flight recovery");
                self.notify(|o| o.recovery_enqueued(&key, position));
            }
        }
        role
    }

    /// Finish the cycle for `key`: drain its waiters and invoke each one with
    /// `recovered`, in enqueue order. Returns how many were released.
    pub fn resolve(&self, key: &K, recovered: bool) -> usize {
        let waiters = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .unwrap_or_default();

        let released = waiters.len();
        tracing::debug!(key = ?key, recovered, released, "recovery finished");
        for completion in waiters {
            completion(recovered);
        }
        self.notify(|o| o.recovery_finished(key, recovered));
        released
    }

    /// Whether a cycle is in flight for `key`.
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Join or lead the cycle for `key` and wait for its outcome.
    ///
    /// `action` runs only when this caller leads the cycle. If the leader is
    /// dropped before `action` completes, the cycle resolves as not
    /// recovered so that no waiter is left behind.
    pub async fn coordinate<F, Fut>(&self, key: K, action: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let (tx, rx) = oneshot::channel();
        let completion: RecoveryCompletion = Box::new(move |recovered| {
            let _ = tx.send(recovered);
        });

        if self.enqueue(key.clone(), completion) == Enqueued::Leader {
            let mut guard = ResolveOnDrop {
                coordinator: self,
                key: Some(key),
            };
            let recovered = action().await;
            guard.resolve(recovered);
        }

        rx.await.unwrap_or(false)
    }
}

struct ResolveOnDrop<'a, K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    coordinator: &'a RecoveryCoordinator<K>,
    key: Option<K>,
}

impl<K> ResolveOnDrop<'_, K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    fn resolve(&mut self, recovered: bool) {
        if let Some(key) = self.key.take() {
            self.coordinator.resolve(&key, recovered);
        }
    }
}

impl<K> Drop for ResolveOnDrop<'_, K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(key) = &self.key {
            tracing::warn!(key = ?key, "recovery action dropped before resolving");
        }
        self.resolve(false);
    }
}
