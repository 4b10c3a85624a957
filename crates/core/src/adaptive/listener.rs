//! Side-effect notifications for phase transitions, TPS changes, and recovery events.
//!
//! Listeners are held in a copy-on-write list consumed in insertion order. A listener's
//! panic or error must never poison the controller: callbacks are invoked inside
//! `catch_unwind` and logged, never propagated.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use super::state::Phase;

/// A notable event in the adaptive controller's lifetime.
#[derive(Debug, Clone, Copy)]
pub enum AdaptiveEvent {
    PhaseTransition {
        from: Phase,
        to: Phase,
        tps: f64,
    },
    TpsChanged {
        tps: f64,
    },
    StabilityReached {
        stable_tps: f64,
    },
    RecoveryStarted {
        last_known_good_tps: f64,
    },
    RecoveryCompleted {
        recovery_tps: f64,
    },
    /// Fired once, the first decision cycle after the controller has held in `Sustain`
    /// for at least `sustain_duration`. Purely advisory: the controller keeps sustaining
    /// afterward, it just stops re-reporting.
    SustainDurationElapsed {
        stable_tps: f64,
        elapsed_in_phase: Duration,
    },
}

/// Receives [`AdaptiveEvent`] notifications from an `AdaptiveController`.
pub trait PatternListener: Send + Sync {
    fn on_event(&self, event: AdaptiveEvent);
}

/// Copy-on-write fan-out list of listeners.
pub struct ListenerList {
    listeners: ArcSwap<Vec<Arc<dyn PatternListener>>>,
}

impl ListenerList {
    pub fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn PatternListener>) {
        self.listeners.rcu(|current| {
            let mut next = (**current).clone();
            next.push(Arc::clone(&listener));
            next
        });
    }

    pub fn notify(&self, event: AdaptiveEvent) {
        let snapshot = self.listeners.load();
        for listener in snapshot.iter() {
            let listener = Arc::clone(listener);
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if result.is_err() {
                tracing::warn!("pattern listener panicked while handling {:?}", event);
            }
        }
    }
}

impl Default for ListenerList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(Arc<AtomicUsize>);
    impl PatternListener for CountingListener {
        fn on_event(&self, _event: AdaptiveEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingListener;
    impl PatternListener for PanickingListener {
        fn on_event(&self, _event: AdaptiveEvent) {
            panic!("boom");
        }
    }

    #[test]
    fn delivers_to_all_listeners_in_order() {
        let list = ListenerList::new();
        let count = Arc::new(AtomicUsize::new(0));
        list.add(Arc::new(CountingListener(Arc::clone(&count))));
        list.add(Arc::new(CountingListener(Arc::clone(&count))));
        list.notify(AdaptiveEvent::TpsChanged { tps: 10.0 });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn a_panicking_listener_does_not_stop_the_others() {
        let list = ListenerList::new();
        let count = Arc::new(AtomicUsize::new(0));
        list.add(Arc::new(PanickingListener));
        list.add(Arc::new(CountingListener(Arc::clone(&count))));
        list.notify(AdaptiveEvent::TpsChanged { tps: 10.0 });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
