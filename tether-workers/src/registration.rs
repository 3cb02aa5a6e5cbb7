//! Registration accounting for one client session
//!
//! A session is deregistered once its task has completed and every worker it
//! registered with has acknowledged the deregistration, or immediately when
//! any of those workers faults.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct CounterState {
    count: usize,
    task_completed: bool,
}

/// Outstanding registrations of a session and its one-shot deregistered signal
#[derive(Debug)]
pub struct RegistrationCounter {
    state: Mutex<CounterState>,
    deregistered: watch::Sender<bool>,
}

impl RegistrationCounter {
    pub fn new() -> Self {
        let (deregistered, _) = watch::channel(false);
        Self {
            state: Mutex::new(CounterState::default()),
            deregistered,
        }
    }

    /// Record a new registration, returning the outstanding count
    pub fn increment(&self) -> usize {
        let mut state = self.lock();
        state.count += 1;
        state.count
    }

    /// Record an acknowledged deregistration, returning the outstanding count
    pub fn decrement(&self) -> usize {
        let (remaining, settled) = {
            let mut state = self.lock();
            if state.count == 0 {
                warn!("Deregistration acknowledged with no outstanding registrations");
                return 0;
            }
            state.count -= 1;
            (state.count, state.count == 0 && state.task_completed)
        };

        if settled {
            self.mark_deregistered();
        }
        remaining
    }

    /// Record that the session's task has finished
    pub fn complete_task(&self) {
        let settled = {
            let mut state = self.lock();
            state.task_completed = true;
            state.count == 0
        };

        if settled {
            self.mark_deregistered();
        }
    }

    /// Fire the deregistered signal, returning whether this call fired it
    pub fn mark_deregistered(&self) -> bool {
        let fired = self.deregistered.send_if_modified(|deregistered| {
            if *deregistered {
                false
            } else {
                *deregistered = true;
                true
            }
        });

        if fired {
            debug!(registrations = self.count(), "Session deregistered from shared workers");
        }
        fired
    }

    pub fn count(&self) -> usize {
        self.lock().count
    }

    pub fn is_task_completed(&self) -> bool {
        self.lock().task_completed
    }

    pub fn is_deregistered(&self) -> bool {
        *self.deregistered.borrow()
    }

    /// Resolves once the deregistered signal has fired
    pub async fn deregistered(&self) {
        let mut deregistered = self.deregistered.subscribe();
        let _ = deregistered.wait_for(|deregistered| *deregistered).await;
    }

    fn lock(&self) -> MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RegistrationCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Deregistration signal of one observed session
#[derive(Debug, Clone)]
pub struct Deregistration {
    counter: Arc<RegistrationCounter>,
}

impl Deregistration {
    pub fn new(counter: Arc<RegistrationCounter>) -> Self {
        Self { counter }
    }

    /// Wait until the session is deregistered from every shared worker
    pub async fn wait(&self) {
        self.counter.deregistered().await
    }

    pub fn is_deregistered(&self) -> bool {
        self.counter.is_deregistered()
    }

    /// Registrations still awaiting acknowledgement
    pub fn registrations(&self) -> usize {
        self.counter.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_fires_when_task_completes_without_registrations() {
        let counter = RegistrationCounter::new();
        assert!(!counter.is_deregistered());

        counter.complete_task();
        assert!(counter.is_deregistered());
    }

    #[test]
    fn test_waits_for_outstanding_acknowledgements() {
        let counter = RegistrationCounter::new();
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);

        counter.complete_task();
        assert!(!counter.is_deregistered());

        assert_eq!(counter.decrement(), 1);
        assert!(!counter.is_deregistered());

        assert_eq!(counter.decrement(), 0);
        assert!(counter.is_deregistered());
    }

    #[test]
    fn test_zero_before_completion_does_not_fire() {
        let counter = RegistrationCounter::new();
        counter.increment();
        counter.decrement();

        assert!(!counter.is_deregistered());
        counter.complete_task();
        assert!(counter.is_deregistered());
    }

    #[test]
    fn test_decrement_never_goes_negative() {
        let counter = RegistrationCounter::new();
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_forced_deregistration_fires_once() {
        let counter = RegistrationCounter::new();
        counter.increment();

        assert!(counter.mark_deregistered());
        assert!(!counter.mark_deregistered());

        counter.complete_task();
        counter.decrement();
        assert!(counter.is_deregistered());
    }

    #[tokio::test]
    async fn test_deregistration_wait() {
        let counter = Arc::new(RegistrationCounter::new());
        let deregistration = Deregistration::new(counter.clone());
        counter.increment();
        counter.complete_task();

        let waiter = tokio::spawn({
            let deregistration = deregistration.clone();
            async move { deregistration.wait().await }
        });

        assert_eq!(deregistration.registrations(), 1);
        counter.decrement();

        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(deregistration.is_deregistered());
    }
}
