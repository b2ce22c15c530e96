//! drainctl-testbed — a synthetic plant for exercising the controller.
//!
//! Everything here exists to produce believable telemetry without a real
//! queue service: a counting [`Queue`], simulated workers with log-normal
//! service times, a log-normal traffic [`Generator`] with burst support,
//! the [`SimPlant`] event loop tying them together behind the
//! [`Plant`](drainctl_control::Plant) contract, and trace record/replay so
//! an interesting traffic pattern can be captured once and rerun.

mod generator;
mod manager;
mod queue;
mod trace;
mod worker;

pub use generator::Generator;
pub use manager::{SimConfig, SimDriver, SimPlant, sim_plant};
pub use queue::Queue;
pub use trace::{TraceError, TraceReplayer, record};
pub use worker::ServiceProfile;

use rand::Rng;
use rand_distr::StandardNormal;

/// Draw `exp(z·σ + μ)` with standard-normal `z`: a log-normal sample in
/// plant units.
pub(crate) fn log_normal_units(log_mu: f64, log_sigma: f64) -> f64 {
    let z: f64 = rand::rng().sample(StandardNormal);
    (z * log_sigma + log_mu).exp()
}
