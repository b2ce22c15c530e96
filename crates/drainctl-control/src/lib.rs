//! drainctl-control — the closed-loop worker-count controller.
//!
//! Binds to a [`Plant`] (queue telemetry in, setpoint out) and periodically
//! computes a smoothed worker-count target so the backlog drains within a
//! configured horizon without starving or overscaling the pool.
//!
//! # Control law
//!
//! ```text
//! R  = max(ȳ/β̄, ẏ/β)            per-worker service rate, historical vs instantaneous
//! queued    (Q > β):  b = ẋ/R,   k = Q / (R · M_q)
//! in-flight (W > 0):  b = harmonic mean of ẋ/R and busy-worker estimate, k = 0
//! idle      (W = 0):  b = ẋ/R/2, k = 0
//! emit: EMA(b) + k
//! ```
//!
//! `b` is smoothed before emission; `k` is the backlog-drain term and is
//! deliberately left unsmoothed so a queue spike gets an immediate response.

mod controller;
mod error;
mod plant;

pub use controller::{ControlConfig, ControlStatus, Controller};
pub use error::ControlError;
pub use plant::{Plant, SetpointReceiver, SetpointSender, setpoint_channel};
