//! drainctl-plant — a plant over polled cloud-style metrics.
//!
//! The controller consumes the narrow [`Plant`](drainctl_control::Plant)
//! view; this crate produces it from the outside world:
//!
//! - [`MetricsSource`] supplies raw timestamped series (sent / deleted
//!   counts, visible / in-flight gauges) from wherever they live.
//! - [`PlantPoller`] reduces the series to current stats on a fixed cadence
//!   and caches them behind [`PolledPlant`]. Telemetry loss beyond a
//!   bounded retry budget is fatal: stale stats are worse than stopping.
//! - [`Actuator`] drains the setpoint mailbox and applies rounded worker
//!   counts to the managed pool through a callback.

mod actuator;
mod error;
mod poller;
mod source;

pub use actuator::{Actuator, ScaleFn};
pub use error::PlantError;
pub use poller::{PlantPoller, PolledPlant, PollerConfig, WorkerCountFn, polled_plant};
pub use source::{DataPoint, MetricsSample, MetricsSource};
