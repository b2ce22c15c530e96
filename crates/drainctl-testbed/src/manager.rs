//! The simulated plant.
//!
//! An event loop owns the worker pool and the arrival/completion counters;
//! the [`SimPlant`] handle exposes them through the
//! [`Plant`](drainctl_control::Plant) contract. Setpoints land in the same
//! loop, so a resize and the counters it affects never race.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use drainctl_control::{Plant, SetpointReceiver, SetpointSender, setpoint_channel};

use crate::queue::Queue;
use crate::worker::{ServiceProfile, Worker};

/// Simulation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    pub service: ServiceProfile,
    /// The time unit everything is expressed in.
    pub unit: Duration,
    /// Messages already waiting when the simulation starts. Counted as
    /// arrivals so in-system never reads negative.
    pub initial_backlog: u64,
}

/// Interval counters behind `rates()`: reset on every read.
struct Interval {
    arrivals: u64,
    departures: u64,
    since: Instant,
}

struct SimShared {
    arrivals: AtomicU64,
    departures: AtomicU64,
    workers: AtomicU64,
    /// Running mean of drawn service times, in units.
    mean_service: Mutex<f64>,
    interval: Mutex<Interval>,
}

/// Plant-facing handle over the simulation.
#[derive(Clone)]
pub struct SimPlant {
    shared: Arc<SimShared>,
    queue: Queue,
    setpoints: SetpointSender,
    messages: mpsc::Sender<()>,
}

/// The simulation event loop.
pub struct SimDriver {
    shared: Arc<SimShared>,
    queue: Queue,
    setpoints: SetpointReceiver,
    messages: mpsc::Receiver<()>,
    processed_rx: mpsc::Receiver<f64>,
    processed_tx: mpsc::Sender<f64>,
    pool: Vec<Worker>,
    service: ServiceProfile,
    unit: Duration,
}

/// Build the simulated plant and the driver that runs it.
pub fn sim_plant(config: SimConfig) -> (SimPlant, SimDriver) {
    let (setpoint_tx, setpoint_rx) = setpoint_channel();
    let (message_tx, message_rx) = mpsc::channel(64);
    let (processed_tx, processed_rx) = mpsc::channel(64);
    let queue = Queue::new(config.initial_backlog);

    let shared = Arc::new(SimShared {
        arrivals: AtomicU64::new(config.initial_backlog),
        departures: AtomicU64::new(0),
        workers: AtomicU64::new(0),
        mean_service: Mutex::new(0.0),
        interval: Mutex::new(Interval {
            arrivals: 0,
            departures: 0,
            since: Instant::now(),
        }),
    });

    (
        SimPlant {
            shared: shared.clone(),
            queue: queue.clone(),
            setpoints: setpoint_tx,
            messages: message_tx,
        },
        SimDriver {
            shared,
            queue,
            setpoints: setpoint_rx,
            messages: message_rx,
            processed_rx,
            processed_tx,
            pool: Vec::new(),
            service: config.service,
            unit: config.unit,
        },
    )
}

enum Event {
    Setpoint(Option<f64>),
    Arrival(Option<()>),
    Completion(Option<f64>),
    Shutdown,
}

impl SimDriver {
    /// Run the event loop until shutdown fires or the setpoint mailbox
    /// closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(unit_us = self.unit.as_micros() as u64, "simulation started");

        loop {
            let event = tokio::select! {
                setpoint = self.setpoints.recv() => Event::Setpoint(setpoint),
                message = self.messages.recv() => Event::Arrival(message),
                drawn = self.processed_rx.recv() => Event::Completion(drawn),
                _ = shutdown.changed() => Event::Shutdown,
            };

            match event {
                Event::Setpoint(Some(setpoint)) => self.resize(setpoint),
                Event::Arrival(Some(())) => self.arrival(),
                Event::Completion(Some(drawn)) => self.completion(drawn),
                Event::Setpoint(None) | Event::Arrival(None) | Event::Completion(None) => break,
                Event::Shutdown => break,
            }
        }

        info!("simulation stopped");
        self.queue.close();
        for worker in self.pool.drain(..) {
            worker.kill();
        }
    }

    fn resize(&mut self, setpoint: f64) {
        let target = setpoint.max(0.0).round() as usize;
        // Newest workers go first on the way down.
        while self.pool.len() > target {
            if let Some(worker) = self.pool.pop() {
                worker.kill();
            }
        }
        while self.pool.len() < target {
            self.pool.push(Worker::spawn(
                self.queue.clone(),
                self.processed_tx.clone(),
                self.service,
                self.unit,
            ));
        }
        self.shared.workers.store(self.pool.len() as u64, Ordering::Relaxed);
        debug!(workers = self.pool.len(), "pool resized");
    }

    fn arrival(&mut self) {
        self.queue.push();
        self.shared.arrivals.fetch_add(1, Ordering::Relaxed);
        self.shared.interval.lock().unwrap().arrivals += 1;
    }

    fn completion(&mut self, drawn: f64) {
        let completed = self.shared.departures.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.interval.lock().unwrap().departures += 1;

        // Exact running mean over every completion so far.
        let mut mean = self.shared.mean_service.lock().unwrap();
        *mean = (*mean * (completed - 1) as f64 + drawn) / completed as f64;
    }
}

impl SimPlant {
    /// Sink for injecting arrivals (generator, replayer, tests).
    pub fn messages(&self) -> mpsc::Sender<()> {
        self.messages.clone()
    }

    /// Total arrivals so far.
    pub fn arrivals(&self) -> u64 {
        self.shared.arrivals.load(Ordering::Relaxed)
    }

    /// Total completions so far.
    pub fn departures(&self) -> u64 {
        self.shared.departures.load(Ordering::Relaxed)
    }
}

impl Plant for SimPlant {
    fn rates(&self, unit: Duration) -> (f64, f64) {
        let mut interval = self.shared.interval.lock().unwrap();
        let now = Instant::now();
        let periods = now.duration_since(interval.since).as_secs_f64() / unit.as_secs_f64();
        if periods <= 0.0 {
            return (0.0, 0.0);
        }
        let rates = (
            interval.arrivals as f64 / periods,
            interval.departures as f64 / periods,
        );
        interval.arrivals = 0;
        interval.departures = 0;
        interval.since = now;
        rates
    }

    fn in_system(&self) -> u64 {
        self.shared
            .arrivals
            .load(Ordering::Relaxed)
            .saturating_sub(self.shared.departures.load(Ordering::Relaxed))
    }

    fn backlog(&self) -> u64 {
        self.queue.pending()
    }

    fn workers(&self) -> u64 {
        self.shared.workers.load(Ordering::Relaxed)
    }

    fn service_time(&self) -> Option<f64> {
        Some(*self.shared.mean_service.lock().unwrap())
    }

    fn setpoints(&self) -> &SetpointSender {
        &self.setpoints
    }
}
