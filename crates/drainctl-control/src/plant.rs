//! The plant contract.
//!
//! A plant is the observable, actuated system — a queue plus its worker
//! pool — reduced to the narrow view the controller needs: two rates, three
//! gauges, an optional service-time estimate, and a single-slot setpoint
//! mailbox. No timestamps, no per-message events, no callbacks.

use std::time::Duration;

use tokio::sync::mpsc;

/// Sending half of the setpoint mailbox. The controller sends one `f64`
/// worker-count target per control period; the send blocks until the
/// actuator has taken the previous one.
pub type SetpointSender = mpsc::Sender<f64>;

/// Receiving half of the setpoint mailbox, held by the actuator. Dropping
/// it closes the mailbox, which the controller treats as "stop".
pub type SetpointReceiver = mpsc::Receiver<f64>;

/// A single-slot blocking mailbox for worker-count setpoints.
pub fn setpoint_channel() -> (SetpointSender, SetpointReceiver) {
    mpsc::channel(1)
}

/// Telemetry source and actuation sink the controller binds to.
///
/// Implementations may run arbitrary internal concurrency (pollers,
/// actuator tasks); every method must be safe to call from the controller
/// task alongside that.
pub trait Plant: Send + Sync {
    /// Arrivals and completions observed since the previous call,
    /// normalised to `unit`. Successive calls describe disjoint,
    /// contiguous intervals — whether the plant resets counters or returns
    /// instantaneous derivatives is its own business.
    fn rates(&self, unit: Duration) -> (f64, f64);

    /// Messages currently in the system: total arrivals minus total
    /// completions.
    fn in_system(&self) -> u64;

    /// Messages visible and awaiting pickup.
    fn backlog(&self) -> u64;

    /// Worker count as currently observed. May lag the last setpoint and
    /// may change asynchronously.
    fn workers(&self) -> u64;

    /// Mean per-message service time in milliseconds, if the plant can
    /// measure it. `None` lets the controller fall back to Little's Law.
    fn service_time(&self) -> Option<f64>;

    /// The setpoint mailbox this plant is actuated through.
    fn setpoints(&self) -> &SetpointSender;
}
