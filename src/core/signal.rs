//! Cooperative cancellation token handed to every unit of work.
//!
//! The scheduler never kills in-flight work. It records a stop request on the
//! job's [`JobSignal`] and the unit of work is contractually obligated to poll
//! [`JobSignal::should_stop`] (or await [`JobSignal::requested`]) at safe
//! points and return early. While the work holds a [`CriticalSection`] guard
//! it is non-interruptible and preemption requests are refused.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// What the scheduler currently asks of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalRequest {
    /// Keep running.
    Run,
    /// Yield the slot; the job will be re-dispatched later.
    Pause,
    /// Stop for good.
    Cancel,
}

#[derive(Debug)]
struct SignalState {
    request: SignalRequest,
    critical_depth: u32,
}

#[derive(Debug)]
struct SignalInner {
    state: Mutex<SignalState>,
    notify: Notify,
}

/// Shared stop flag for one dispatch of a job.
#[derive(Debug, Clone)]
pub struct JobSignal {
    inner: Arc<SignalInner>,
}

impl Default for JobSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSignal {
    /// A fresh signal in the `Run` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                state: Mutex::new(SignalState {
                    request: SignalRequest::Run,
                    critical_depth: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// The pending request.
    #[must_use]
    pub fn request(&self) -> SignalRequest {
        self.inner.state.lock().request
    }

    /// Whether the work should wind down (pause or cancel requested).
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.request() != SignalRequest::Run
    }

    /// Whether cancellation specifically was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.request() == SignalRequest::Cancel
    }

    /// Whether the work is outside any critical section.
    #[must_use]
    pub fn is_interruptible(&self) -> bool {
        self.inner.state.lock().critical_depth == 0
    }

    /// Resolves once a pause or cancel has been requested.
    pub async fn requested(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.should_stop() {
                return;
            }
            notified.await;
        }
    }

    /// Mark the work non-interruptible until the guard drops.
    #[must_use = "the critical section ends when the guard is dropped"]
    pub fn enter_critical(&self) -> CriticalSection {
        self.inner.state.lock().critical_depth += 1;
        CriticalSection {
            signal: self.clone(),
        }
    }

    /// Request cancellation. Always succeeds and overrides a pause.
    pub(crate) fn request_cancel(&self) {
        self.inner.state.lock().request = SignalRequest::Cancel;
        self.inner.notify.notify_waiters();
    }

    /// Request a pause; refused while the work is in a critical section or
    /// already stopping.
    pub(crate) fn try_request_pause(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.critical_depth > 0 || state.request != SignalRequest::Run {
                return false;
            }
            state.request = SignalRequest::Pause;
        }
        self.inner.notify.notify_waiters();
        true
    }
}

/// Guard returned by [`JobSignal::enter_critical`].
#[derive(Debug)]
pub struct CriticalSection {
    signal: JobSignal,
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        let mut state = self.signal.inner.state.lock();
        state.critical_depth = state.critical_depth.saturating_sub(1);
    }
}
