use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use quiz_core::model::{Answers, QuizId, SessionErrors, SessionStatus, StepId};

use super::progress::QuizProgress;

/// What the render layer receives after every committed change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub quiz_id: QuizId,
    pub current_step: StepId,
    pub answers: Answers,
    pub status: SessionStatus,
    pub errors: SessionErrors,
    pub progress: QuizProgress,
    pub can_go_back: bool,
}

type Listener = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

/// Registry of snapshot listeners for one engine.
#[derive(Default)]
pub(crate) struct Observers {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl Observers {
    pub(crate) fn subscribe(self: &Arc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, listener));
        Subscription {
            id,
            observers: Arc::downgrade(self),
        }
    }

    /// Call every listener with `snapshot`.
    ///
    /// Listeners run outside the registry lock, so they may subscribe or
    /// unsubscribe from inside the callback.
    pub(crate) fn notify(&self, snapshot: &SessionSnapshot) {
        let listeners: Vec<Listener> = self.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(existing, _)| *existing != id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by `QuizEngine::subscribe`.
///
/// The listener stays registered until the handle is dropped or
/// `unsubscribe` is called.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    id: u64,
    observers: Weak<Observers>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
