//! One-shot timers for round timeouts and retries.
//!
//! A [`TimerManager`] arms millisecond timers on a tokio runtime. Every timer fires at most once,
//! and exactly one of firing and [cancelling](TimerManager::cancel) wins for a given id: the task
//! of a timer and its callback are registered together, and removed together under a single lock
//! by whichever comes first.
//!
//! Callbacks run on a runtime worker, outside of the lock, so they may register or cancel other
//! timers. Like message handlers, they should not block. A callback that reschedules itself
//! should capture a [`WeakTimerManager`]: a callback holding a [`TimerManager`] keeps the timers
//! alive until it fires, even after every other clone is dropped.
//!
//! ```rust
//! # use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
//! # use pddm::timer::TimerManager;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let timers = TimerManager::try_current().unwrap();
//! let fired = Arc::new(AtomicBool::new(false));
//!
//! let flag = fired.clone();
//! let id = timers.register(50, move || flag.store(true, Ordering::SeqCst));
//! assert!(timers.cancel(id));
//!
//! tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//! assert!(!fired.load(Ordering::SeqCst));
//! # }
//! ```

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        Weak,
    },
    time::Duration,
};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, trace};

/// The identifier of a timer. Identifiers are never reused by a manager.
pub type TimerId = u64;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("timers need a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// The timers that have neither fired nor been cancelled yet.
#[derive(Default)]
struct Timers {
    tasks: HashMap<TimerId, JoinHandle<()>>,
    callbacks: HashMap<TimerId, Callback>,
}

impl Timers {
    /// Removes both entries of a timer, or none if one of them is already gone.
    fn take(&mut self, id: TimerId) -> Option<(JoinHandle<()>, Callback)> {
        match (self.tasks.remove(&id), self.callbacks.remove(&id)) {
            (Some(task), Some(callback)) => Some((task, callback)),
            (None, None) => None,
            _ => unreachable!("timer {} is registered in a single table", id),
        }
    }
}

/// A scheduler of one-shot delayed callbacks.
///
/// Clones share the same timers. Dropping the last clone cancels all pending timers, and so does
/// [`shutdown`](TimerManager::shutdown).
#[derive(Clone)]
pub struct TimerManager {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Handle,
    next_id: AtomicU64,
    timers: Arc<Mutex<Timers>>,
}

impl TimerManager {
    /// Creates a manager that arms its timers on the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                next_id: AtomicU64::new(0),
                timers: Arc::new(Mutex::new(Timers::default())),
            }),
        }
    }

    /// Creates a manager on the runtime of the calling context.
    ///
    /// # Errors
    /// Fails if called outside of a tokio runtime.
    pub fn try_current() -> Result<Self, TimerError> {
        Ok(Self::new(Handle::try_current()?))
    }

    /// Arms a timer that calls `callback` once after `delay_ms` milliseconds, and returns
    /// immediately.
    pub fn register<F>(&self, delay_ms: u64, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let timers = self.inner.timers.clone();

        // the lock is held until both entries exist, so the task cannot fire before
        let mut guard = self.inner.timers.lock();
        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let entry = timers.lock().take(id);
            if let Some((_, callback)) = entry {
                trace!("timer {} fired", id);
                callback();
            }
        });
        guard.tasks.insert(id, task);
        guard.callbacks.insert(id, Box::new(callback));
        debug!("timer {} registered for {} ms", id, delay_ms);
        id
    }

    /// Cancels a timer.
    ///
    /// Returns `false` if the timer already fired or was already cancelled. A callback that is
    /// already running is not interrupted.
    pub fn cancel(&self, id: TimerId) -> bool {
        let entry = self.inner.timers.lock().take(id);
        match entry {
            Some((task, _)) => {
                task.abort();
                debug!("timer {} cancelled", id);
                true
            }
            None => {
                trace!("timer {} already fired or cancelled", id);
                false
            }
        }
    }

    /// The number of timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.inner.timers.lock().tasks.len()
    }

    /// Cancels all pending timers and returns how many were cancelled.
    ///
    /// The manager stays usable, timers registered afterwards are armed as usual.
    pub fn shutdown(&self) -> usize {
        let Timers { tasks, callbacks } = std::mem::take(&mut *self.inner.timers.lock());
        for task in tasks.values() {
            task.abort();
        }
        // dropped outside of the lock, they may hold the last clone of this manager
        drop(callbacks);
        debug!("{} timers cancelled on shutdown", tasks.len());
        tasks.len()
    }

    /// Creates a handle that does not keep the timers alive.
    pub fn downgrade(&self) -> WeakTimerManager {
        WeakTimerManager {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// A [`TimerManager`] handle for callbacks, which does not keep the timers alive.
#[derive(Clone)]
pub struct WeakTimerManager {
    inner: Weak<Inner>,
}

impl WeakTimerManager {
    /// Gets the manager back, unless all its clones were dropped.
    pub fn upgrade(&self) -> Option<TimerManager> {
        self.inner.upgrade().map(|inner| TimerManager { inner })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let mut timers = self.timers.lock();
        for (_, task) in timers.tasks.drain() {
            task.abort();
        }
        timers.callbacks.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::time::sleep;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let count = Arc::new(AtomicUsize::new(0));
        let shared = count.clone();
        let make = move || {
            let count = shared.clone();
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (count, make)
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let timers = TimerManager::try_current().unwrap();
        let (count, callback) = counter();
        let id = timers.register(50, callback());
        assert!(timers.cancel(id));
        assert_eq!(timers.pending(), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timer_fires_exactly_once() {
        let timers = TimerManager::try_current().unwrap();
        let (count, callback) = counter();
        let id = timers.register(10, callback());
        assert_eq!(timers.pending(), 1);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 0);

        // cancelling after firing is a no-op
        assert!(!timers.cancel(id));
        assert!(!timers.cancel(id));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ids_are_never_reused() {
        let timers = TimerManager::try_current().unwrap();
        let (_, callback) = counter();
        let first = timers.register(1000, callback());
        assert!(timers.cancel(first));
        let second = timers.register(1000, callback());
        assert!(second > first);
        assert!(!timers.cancel(first));
        assert!(timers.cancel(second));
    }

    #[tokio::test]
    async fn timers_fire_independently() {
        let timers = TimerManager::try_current().unwrap();
        let (count, callback) = counter();
        let ids: Vec<TimerId> = (0..10).map(|i| timers.register(5 * i, callback())).collect();
        assert!(timers.cancel(ids[9]));

        sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 9);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn callback_may_use_the_manager() {
        let timers = TimerManager::try_current().unwrap();
        let (count, callback) = counter();
        let rescheduler = timers.downgrade();
        let retry = callback();
        timers.register(5, move || {
            if let Some(timers) = rescheduler.upgrade() {
                timers.register(5, retry);
            }
        });

        sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn weak_handles_do_not_keep_timers_alive() {
        let (count, callback) = counter();
        let weak = {
            let timers = TimerManager::try_current().unwrap();
            let rescheduler = timers.downgrade();
            let retry = callback();
            timers.register(20, move || {
                if let Some(timers) = rescheduler.upgrade() {
                    timers.register(5, retry);
                }
            });
            timers.downgrade()
        };
        assert!(weak.upgrade().is_none());

        sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_callbacks_holding_the_manager() {
        let timers = TimerManager::try_current().unwrap();
        let (count, callback) = counter();
        let owner = timers.clone();
        let retry = callback();
        timers.register(20, move || {
            owner.register(5, retry);
        });
        timers.register(20, callback());

        assert_eq!(timers.shutdown(), 2);
        assert_eq!(timers.pending(), 0);
        drop(timers);

        sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn manager_is_usable_after_shutdown() {
        let timers = TimerManager::try_current().unwrap();
        let (count, callback) = counter();
        timers.register(1000, callback());
        assert_eq!(timers.shutdown(), 1);
        assert_eq!(timers.shutdown(), 0);

        timers.register(5, callback());
        sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_the_manager_cancels_timers() {
        let (count, callback) = counter();
        {
            let timers = TimerManager::try_current().unwrap();
            timers.register(20, callback());
            timers.register(30, callback());
        }
        sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_runtime() {
        assert!(matches!(
            TimerManager::try_current(),
            Err(TimerError::NoRuntime(_))
        ));
    }
}
