use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::{MIN_SAMPLES, MIN_WEIGHT, RATE_THRESHOLD, WEIGHT_EPSILON};

/// One dispatched call's outcome.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    /// Elapsed time exceeded the configured timeout threshold
    pub timeout: bool,
    /// The invocation itself failed (validation rejections do not count)
    pub error: bool,
    /// When the outcome was recorded
    pub at: Instant,
}

/// What an evaluation decided for one identifier.
///
/// `gate` carries the new gate position (`true` = open, heartbeats flow),
/// `weight` carries a proposed new weight that still needs a successful
/// registry update before it is committed. Either or both may be `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Decision {
    pub gate: Option<bool>,
    pub weight: Option<f64>,
}

impl Decision {
    pub fn is_noop(&self) -> bool {
        self.gate.is_none() && self.weight.is_none()
    }
}

/// Rolling health state for a single service identifier.
///
/// Invariants, maintained by this type:
/// - the window never exceeds its capacity (FIFO eviction)
/// - `MIN_WEIGHT <= current_weight <= base_weight`
/// - gate toggles and weight adjustments each happen at most once per
///   cooldown period
#[derive(Debug)]
pub struct HealthState {
    window: VecDeque<Outcome>,
    capacity: usize,
    base_weight: f64,
    current_weight: f64,
    gate_open: bool,
    last_weight_adjust: Option<Instant>,
    last_gate_adjust: Option<Instant>,
}

impl HealthState {
    pub fn new(base_weight: f64, capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            base_weight,
            current_weight: base_weight,
            gate_open: true,
            last_weight_adjust: None,
            last_gate_adjust: None,
        }
    }

    /// Append an outcome, evicting the oldest entries beyond capacity.
    pub fn record(&mut self, timeout: bool, error: bool, at: Instant) {
        self.window.push_back(Outcome { timeout, error, at });
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
    }

    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    pub fn current_weight(&self) -> f64 {
        self.current_weight
    }

    pub fn base_weight(&self) -> f64 {
        self.base_weight
    }

    /// Whether heartbeats are currently emitted for this identifier.
    pub fn gate_open(&self) -> bool {
        self.gate_open
    }

    /// Fraction of window samples that timed out.
    pub fn timeout_rate(&self) -> f64 {
        self.rate(|o| o.timeout)
    }

    /// Fraction of window samples that errored.
    pub fn error_rate(&self) -> f64 {
        self.rate(|o| o.error)
    }

    fn rate(&self, pick: impl Fn(&Outcome) -> bool) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let hits = self.window.iter().filter(|o| pick(o)).count();
        hits as f64 / self.window.len() as f64
    }

    /// Evaluate the window and decide gate and weight actions.
    ///
    /// Skips entirely below [`MIN_SAMPLES`]. The two decisions are
    /// independent: a degraded service keeps serving until its gate closes.
    pub fn evaluate(&self, cooldown: Duration, now: Instant) -> Decision {
        if self.window.len() < MIN_SAMPLES {
            return Decision::default();
        }

        let t_rate = self.timeout_rate();
        let e_rate = self.error_rate();
        let mut decision = Decision::default();

        if cooled_down(self.last_gate_adjust, cooldown, now) {
            if e_rate >= RATE_THRESHOLD && self.gate_open {
                decision.gate = Some(false);
            } else if e_rate < RATE_THRESHOLD && !self.gate_open {
                decision.gate = Some(true);
            }
        }

        if cooled_down(self.last_weight_adjust, cooldown, now) {
            let proposed = if t_rate >= RATE_THRESHOLD {
                Some((self.current_weight * 0.5).max(MIN_WEIGHT))
            } else if self.current_weight < self.base_weight {
                // Recovery ramps up as timeouts subside: the factor is 1 at
                // the threshold and 2 at a clean window, clamped to base.
                let factor = 1.0 + 2.0 * (RATE_THRESHOLD - t_rate);
                Some((self.current_weight * factor).min(self.base_weight))
            } else {
                None
            };
            if let Some(w) = proposed {
                if (w - self.current_weight).abs() >= WEIGHT_EPSILON {
                    decision.weight = Some(w);
                }
            }
        }

        decision
    }

    /// Commit a weight the registry has accepted.
    pub fn commit_weight(&mut self, weight: f64, at: Instant) {
        self.current_weight = weight.clamp(MIN_WEIGHT, self.base_weight);
        self.last_weight_adjust = Some(at);
    }

    /// Move the gate and start its cooldown.
    pub fn set_gate(&mut self, open: bool, at: Instant) {
        self.gate_open = open;
        self.last_gate_adjust = Some(at);
    }
}

fn cooled_down(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    match last {
        None => true,
        Some(at) => now.saturating_duration_since(at) >= cooldown,
    }
}
