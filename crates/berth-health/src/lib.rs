//! Per-service health statistics and feedback control.
//!
//! Every dispatched call records an outcome `(timeout, error)` into a rolling
//! window kept per service identifier. A periodic evaluation derives two
//! independent decisions from the window:
//!
//! - **Error rate → gate (circuit breaker)**: at ≥ 50% errors the heartbeat
//!   gate closes, which stops heartbeat emission and lets the registry mark
//!   the ephemeral instance unhealthy. Below 50% the gate re-opens.
//! - **Timeout rate → weight (graceful degradation)**: at ≥ 50% timeouts the
//!   advertised weight halves (floored at 0.1); below the threshold the
//!   weight ramps back toward its base value, faster the fewer timeouts
//!   remain.
//!
//! Both decisions respect a shared per-identifier cooldown so the controller
//! never flaps. Weight changes are *proposed* by [`HealthState::evaluate`]
//! and only committed after the registry accepted the update; gate toggles
//! take effect locally and need no registry call.
//!
//! # Thread safety
//!
//! [`HealthLedger`] wraps the per-identifier states in an `RwLock`ed map so
//! the dispatcher, the heartbeat scheduler and the evaluation timer can share
//! it behind an `Arc`. Critical sections are short; the evaluation timer is
//! the only writer of weights and gates, which keeps the control timeline
//! single-threaded in the logical sense.

mod ledger;
mod state;

pub use ledger::HealthLedger;
pub use state::{Decision, HealthState, Outcome};

use std::time::Duration;

/// Lowest weight degradation may reach.
pub const MIN_WEIGHT: f64 = 0.1;

/// Inclusive rate threshold shared by the gate and weight decisions.
pub const RATE_THRESHOLD: f64 = 0.5;

/// Minimum samples in the window before an evaluation may act.
pub const MIN_SAMPLES: usize = 10;

/// Weight deltas below this are not worth a registry round-trip.
pub const WEIGHT_EPSILON: f64 = 1e-3;

/// Cadence of the periodic evaluation.
pub const EVAL_PERIOD: Duration = Duration::from_secs(5);
