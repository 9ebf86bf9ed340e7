//! Trailing-edge debouncer built on tokio timers.
//!
//! Each [`Debouncer::trigger`] call replaces the pending timer, so a burst of
//! triggers collapses into one invocation of the action `delay` after the last
//! call, carrying that call's arguments.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

type Action<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

pub struct Debouncer<T> {
    delay: Duration,
    action: Action<T>,
    pending: Option<JoinHandle<()>>,
}

impl<T> Debouncer<T>
where
    T: Send + 'static,
{
    pub fn new<F>(delay: Duration, action: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            delay,
            action: Arc::new(action),
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel any pending invocation and schedule a new one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger(&mut self, args: T) {
        self.cancel();
        let action = Arc::clone(&self.action);
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action(args);
        }));
    }

    /// Drop the pending invocation, if any. Returns `true` when one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl<T> fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field(
                "pending",
                &self.pending.as_ref().map(|handle| !handle.is_finished()),
            )
            .finish()
    }
}
