//! # Availability State Machine
//!
//! Tracks whether each remote service is reachable, as reported by discovery,
//! and runs registered actions on every edge.
//!
//! ## Invariants
//!
//! - `on_availability_changed` is the only mutator. Construction has no effects.
//! - On-available actions run exactly once per Unavailable→Available edge;
//!   a repeated `true` while Available does nothing.
//! - Actions own their failures. The state machine never sees them.

use std::collections::HashMap;
use std::sync::Arc;

use somerpc::ServiceAddress;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AvailabilityState {
    #[default]
    Unavailable,
    Available,
}

/// An edge between the two states.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    BecameAvailable,
    BecameUnavailable,
}

/// Side effects bound to availability edges.
#[async_trait::async_trait]
pub trait AvailabilityAction: Send + Sync + 'static {
    async fn on_available(&self, address: ServiceAddress);

    async fn on_unavailable(&self, _address: ServiceAddress) {}
}

/// Per-service reachability with edge-triggered actions.
#[derive(Default)]
pub struct AvailabilityMonitor {
    states: HashMap<ServiceAddress, AvailabilityState>,
    actions: Vec<Arc<dyn AvailabilityAction>>,
}

impl AvailabilityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an action. Actions run in registration order.
    pub fn register(&mut self, action: Arc<dyn AvailabilityAction>) {
        self.actions.push(action);
    }

    /// Current state of `address`. Unknown services are Unavailable.
    pub fn state(&self, address: ServiceAddress) -> AvailabilityState {
        self.states.get(&address).copied().unwrap_or_default()
    }

    /// Applies a discovery signal and reports the edge it caused, if any.
    ///
    /// Pure: updates the state and runs no actions.
    pub fn transition(&mut self, address: ServiceAddress, available: bool) -> Option<Transition> {
        let next = if available {
            AvailabilityState::Available
        } else {
            AvailabilityState::Unavailable
        };
        let previous = self.states.insert(address, next).unwrap_or_default();

        match (previous, next) {
            (AvailabilityState::Unavailable, AvailabilityState::Available) => Some(Transition::BecameAvailable),
            (AvailabilityState::Available, AvailabilityState::Unavailable) => Some(Transition::BecameUnavailable),
            _ => None,
        }
    }

    /// Applies a discovery signal and runs the actions for the resulting edge.
    pub async fn on_availability_changed(&mut self, address: ServiceAddress, available: bool) -> Option<Transition> {
        let transition = self.transition(address, available)?;
        tracing::info!(%address, ?transition, "service availability changed");

        for action in &self.actions {
            match transition {
                Transition::BecameAvailable => action.on_available(address).await,
                Transition::BecameUnavailable => action.on_unavailable(address).await,
            }
        }
        Some(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const ADDR: ServiceAddress = ServiceAddress::new(0x1234, 0x5678);
    const OTHER: ServiceAddress = ServiceAddress::new(0x1234, 0x0001);

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(ServiceAddress, bool)>>,
    }

    impl Recorder {
        fn count(&self, available: bool) -> usize {
            self.seen.lock().unwrap().iter().filter(|(_, a)| *a == available).count()
        }
    }

    #[async_trait::async_trait]
    impl AvailabilityAction for Recorder {
        async fn on_available(&self, address: ServiceAddress) {
            self.seen.lock().unwrap().push((address, true));
        }

        async fn on_unavailable(&self, address: ServiceAddress) {
            self.seen.lock().unwrap().push((address, false));
        }
    }

    #[test]
    fn test_initial_state_is_unavailable() {
        let monitor = AvailabilityMonitor::new();
        assert_eq!(monitor.state(ADDR), AvailabilityState::Unavailable);
    }

    #[test]
    fn test_transition_edges() {
        let mut monitor = AvailabilityMonitor::new();
        assert_eq!(monitor.transition(ADDR, false), None);
        assert_eq!(monitor.transition(ADDR, true), Some(Transition::BecameAvailable));
        assert_eq!(monitor.transition(ADDR, true), None);
        assert_eq!(monitor.transition(ADDR, false), Some(Transition::BecameUnavailable));
        assert_eq!(monitor.transition(ADDR, false), None);
    }

    #[tokio::test]
    async fn test_repeated_true_fires_once_per_edge() {
        let recorder = Arc::new(Recorder::default());
        let mut monitor = AvailabilityMonitor::new();
        monitor.register(recorder.clone());

        for signal in [true, true, false, true] {
            monitor.on_availability_changed(ADDR, signal).await;
        }

        assert_eq!(recorder.count(true), 2);
        assert_eq!(recorder.count(false), 1);
        assert_eq!(monitor.state(ADDR), AvailabilityState::Available);
    }

    #[tokio::test]
    async fn test_services_are_tracked_independently() {
        let recorder = Arc::new(Recorder::default());
        let mut monitor = AvailabilityMonitor::new();
        monitor.register(recorder.clone());

        monitor.on_availability_changed(ADDR, true).await;
        monitor.on_availability_changed(OTHER, true).await;
        monitor.on_availability_changed(OTHER, false).await;

        assert_eq!(monitor.state(ADDR), AvailabilityState::Available);
        assert_eq!(monitor.state(OTHER), AvailabilityState::Unavailable);
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![(ADDR, true), (OTHER, true), (OTHER, false)]
        );
    }

    #[tokio::test]
    async fn test_no_effects_without_signals() {
        let recorder = Arc::new(Recorder::default());
        let mut monitor = AvailabilityMonitor::new();
        monitor.register(recorder.clone());
        assert!(recorder.seen.lock().unwrap().is_empty());

        // an initial `false` is not an edge either
        assert_eq!(monitor.on_availability_changed(ADDR, false).await, None);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
