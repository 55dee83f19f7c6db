use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::state::{Decision, HealthState};

/// Shared registry of per-identifier health states.
///
/// The dispatcher records outcomes, the heartbeat scheduler reads gates and
/// weights, and the evaluation timer drives decisions. All of them hold the
/// ledger behind an `Arc`. Identifier states are disjoint; the map itself is
/// only written at registration time.
pub struct HealthLedger {
    base_weight: f64,
    window_capacity: usize,
    cooldown: Duration,
    states: RwLock<HashMap<String, HealthState>>,
}

impl HealthLedger {
    pub fn new(base_weight: f64, window_capacity: usize, cooldown: Duration) -> Self {
        Self {
            base_weight,
            window_capacity,
            cooldown,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Create (or reset) the state for an identifier.
    ///
    /// Re-registering an identifier starts over from the base weight with an
    /// open gate and an empty window.
    pub fn register(&self, key: &str) {
        let mut states = self.states.write().unwrap();
        states.insert(
            key.to_string(),
            HealthState::new(self.base_weight, self.window_capacity),
        );
    }

    pub fn keys(&self) -> Vec<String> {
        self.states.read().unwrap().keys().cloned().collect()
    }

    /// Record one dispatch outcome. Unknown identifiers are ignored.
    pub fn record(&self, key: &str, timeout: bool, error: bool) {
        let mut states = self.states.write().unwrap();
        if let Some(state) = states.get_mut(key) {
            state.record(timeout, error, Instant::now());
            debug!(
                identifier = key,
                timeout, error, "recorded dispatch outcome"
            );
        }
    }

    pub fn sample_count(&self, key: &str) -> usize {
        self.states
            .read()
            .unwrap()
            .get(key)
            .map_or(0, |s| s.sample_count())
    }

    /// Current advertised weight for an identifier, or the base weight if it
    /// is unknown.
    pub fn weight_of(&self, key: &str) -> f64 {
        self.states
            .read()
            .unwrap()
            .get(key)
            .map_or(self.base_weight, |s| s.current_weight())
    }

    /// Whether heartbeats should be emitted for an identifier.
    pub fn gate_open(&self, key: &str) -> bool {
        self.states
            .read()
            .unwrap()
            .get(key)
            .map_or(true, |s| s.gate_open())
    }

    /// Evaluate one identifier's window at `now`.
    pub fn evaluate(&self, key: &str, now: Instant) -> Decision {
        self.states
            .read()
            .unwrap()
            .get(key)
            .map_or(Decision::default(), |s| s.evaluate(self.cooldown, now))
    }

    /// Commit a weight the registry accepted.
    pub fn commit_weight(&self, key: &str, weight: f64, at: Instant) {
        let mut states = self.states.write().unwrap();
        if let Some(state) = states.get_mut(key) {
            state.commit_weight(weight, at);
        }
    }

    /// Toggle the heartbeat gate.
    pub fn set_gate(&self, key: &str, open: bool, at: Instant) {
        let mut states = self.states.write().unwrap();
        if let Some(state) = states.get_mut(key) {
            state.set_gate(open, at);
        }
    }
}
