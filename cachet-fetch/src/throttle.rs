//! Leading + trailing throttle.
//!
//! The first trigger runs the action immediately and opens a window. Triggers
//! during the window are absorbed into a single trailing run at window end,
//! which opens a new window of its own. A window that closes with no trailing
//! run returns the throttle to idle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{trace, warn};

type Action = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct ThrottleState {
    /// A window is open
    cooling: bool,
    /// A trigger arrived during the open window
    trailing: bool,
}

/// Collapses bursts of triggers into at most one run per window.
pub struct Throttle {
    window: Duration,
    state: Arc<Mutex<ThrottleState>>,
    action: Action,
}

impl Throttle {
    /// Creates a throttle around `action`.
    pub fn new(window: Duration, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            window,
            state: Arc::new(Mutex::new(ThrottleState::default())),
            action: Arc::new(action),
        }
    }

    /// Returns the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true while a window is open.
    pub fn is_cooling(&self) -> bool {
        self.state.lock().cooling
    }

    /// Requests a run.
    ///
    /// Must be called from within a Tokio runtime; the window timer is
    /// spawned on it. Outside a runtime the trigger is ignored.
    pub fn trigger(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Throttle triggered outside a Tokio runtime; ignoring");
            return;
        };

        {
            let mut state = self.state.lock();
            if state.cooling {
                state.trailing = true;
                trace!("Throttle absorbed trigger");
                return;
            }
            state.cooling = true;
        }

        (self.action)();

        let state = self.state.clone();
        let action = self.action.clone();
        let window = self.window;
        runtime.spawn(async move {
            loop {
                tokio::time::sleep(window).await;
                let run_trailing = {
                    let mut state = state.lock();
                    if state.trailing {
                        state.trailing = false;
                        true
                    } else {
                        state.cooling = false;
                        false
                    }
                };
                if !run_trailing {
                    break;
                }
                trace!("Throttle trailing run");
                action();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(window_ms: u64) -> (Throttle, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let throttle = Throttle::new(Duration::from_millis(window_ms), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (throttle, runs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_run_is_immediate() {
        let (throttle, runs) = counting(100);
        throttle.trigger();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(throttle.is_cooling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_leading_and_trailing() {
        let (throttle, runs) = counting(100);
        for _ in 0..5 {
            throttle.trigger();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // The trailing run opened a new window; it closes with nothing pending.
        tokio::time::sleep(Duration::from_millis(110)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!throttle.is_cooling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trigger_has_no_trailing_run() {
        let (throttle, runs) = counting(100);
        throttle.trigger();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!throttle.is_cooling());

        throttle.trigger();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_trigger_outside_runtime_is_ignored() {
        let (throttle, runs) = counting(100);
        throttle.trigger();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!throttle.is_cooling());
    }
}
