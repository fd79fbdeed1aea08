//! Connectivity Monitor
//!
//! Tells "the backend is unreachable" apart from "the backend said no"
//! without a heartbeat: any response, whatever its status, resets the
//! counter; any request that got no response at all increments it. Crossing
//! the threshold on a protected route ends the session once and resets.

use parking_lot::Mutex;
use std::sync::Arc;

use portal_navigation::{Navigator, RouteMap};
use portal_session::{AuthEventSink, TerminationReason};

pub const DEFAULT_CONNECTIVITY_THRESHOLD: u32 = 2;

pub struct ConnectivityMonitor {
    count: Arc<Mutex<u32>>,
    threshold: u32,
    navigator: Arc<dyn Navigator>,
    routes: RouteMap,
    sink: Arc<dyn AuthEventSink>,
}

impl ConnectivityMonitor {
    pub fn new(
        threshold: u32,
        navigator: Arc<dyn Navigator>,
        routes: RouteMap,
        sink: Arc<dyn AuthEventSink>,
    ) -> Self {
        Self {
            count: Arc::new(Mutex::new(0)),
            threshold: threshold.max(1),
            navigator,
            routes,
            sink,
        }
    }

    pub fn count(&self) -> u32 {
        *self.count.lock()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&self) {
        *self.count.lock() = 0;
    }

    /// The server answered (any status)
    pub fn record_response(&self) {
        let mut count = self.count.lock();
        if *count > 0 {
            tracing::debug!(previous = *count, "Backend reachable again, resetting failure count");
        }
        *count = 0;
    }

    /// No response was received. Returns `true` when this failure tore the session down.
    pub fn record_transport_failure(&self) -> bool {
        {
            let mut count = self.count.lock();
            *count = count.saturating_add(1);
            tracing::warn!(
                count = *count,
                threshold = self.threshold,
                "Transport failure recorded"
            );

            if *count < self.threshold {
                return false;
            }

            let path = self.navigator.current_path();
            if !self.routes.is_protected(&path) {
                tracing::debug!(path = %path, "Threshold reached outside a protected route");
                return false;
            }

            *count = 0;
        }

        // Sink runs outside the counter lock
        self.sink.terminate(TerminationReason::ConnectivityLost)
    }
}

impl Clone for ConnectivityMonitor {
    fn clone(&self) -> Self {
        Self {
            count: Arc::clone(&self.count),
            threshold: self.threshold,
            navigator: Arc::clone(&self.navigator),
            routes: self.routes.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_navigation::HistoryNavigator;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingSink {
        terminations: AtomicU32,
    }

    impl AuthEventSink for CountingSink {
        fn notify(&self, _reason: TerminationReason) {}

        fn terminate(&self, reason: TerminationReason) -> bool {
            assert_eq!(reason, TerminationReason::ConnectivityLost);
            self.terminations.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn monitor(path: &str) -> (ConnectivityMonitor, Arc<CountingSink>) {
        let sink = Arc::new(CountingSink::default());
        let monitor = ConnectivityMonitor::new(
            DEFAULT_CONNECTIVITY_THRESHOLD,
            Arc::new(HistoryNavigator::new(path)),
            RouteMap::default(),
            sink.clone(),
        );
        (monitor, sink)
    }

    #[test]
    fn test_fires_at_threshold_and_resets() {
        let (monitor, sink) = monitor("/dashboard/commissions");

        assert!(!monitor.record_transport_failure());
        assert!(monitor.record_transport_failure());

        assert_eq!(sink.terminations.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.count(), 0);
    }

    #[test]
    fn test_response_resets_count() {
        let (monitor, sink) = monitor("/dashboard");

        assert!(!monitor.record_transport_failure());
        monitor.record_response();
        assert_eq!(monitor.count(), 0);
        assert!(!monitor.record_transport_failure());

        assert_eq!(sink.terminations.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.count(), 1);
    }

    #[test]
    fn test_public_route_never_fires() {
        let (monitor, sink) = monitor("/news");

        for _ in 0..5 {
            assert!(!monitor.record_transport_failure());
        }

        assert_eq!(sink.terminations.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.count(), 5);
    }

    #[test]
    fn test_count_saturates_on_public_route() {
        let (monitor, sink) = monitor("/news");
        *monitor.count.lock() = u32::MAX;

        assert!(!monitor.record_transport_failure());
        assert_eq!(monitor.count(), u32::MAX);
        assert_eq!(sink.terminations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let sink = Arc::new(CountingSink::default());
        let monitor = ConnectivityMonitor::new(
            0,
            Arc::new(HistoryNavigator::new("/dashboard")),
            RouteMap::default(),
            sink,
        );
        assert_eq!(monitor.threshold(), 1);
    }
}
