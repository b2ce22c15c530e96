//! draind — the drainctl daemon.
//!
//! Runs the worker-count controller against the synthetic testbed, with
//! either generated traffic or a recorded arrival trace:
//!
//! ```text
//! draind simulate --gen-log-mu 2.3 --service-log-mu 4.6 --duration-secs 120
//! draind simulate --record arrivals.trace
//! draind replay --trace arrivals.trace
//! ```
//!
//! A production deployment swaps the testbed for a polled metrics plant
//! and an actuator; the controller wiring is identical.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use drainctl_control::{ControlConfig, ControlStatus, Controller, Plant};
use drainctl_testbed::{Generator, ServiceProfile, SimConfig, SimPlant, TraceReplayer, record, sim_plant};

#[derive(Parser)]
#[command(name = "draind", about = "Queue worker-pool autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Controller and run-length flags shared by every mode.
#[derive(Args)]
struct ControlArgs {
    /// Plant time unit, in milliseconds.
    #[arg(long, default_value = "1")]
    unit_ms: u64,

    /// Control period, in units.
    #[arg(long, default_value = "1000")]
    period: u64,

    /// Maximum time to drain the current backlog, in units.
    #[arg(long, default_value = "60000")]
    drain_horizon: u64,

    /// Output smoother window (1 disables smoothing).
    #[arg(long, default_value = "1")]
    ema_size: usize,

    /// Rate-integrator window.
    #[arg(long, default_value = "100")]
    emi_size: usize,

    /// Internal-concurrency smoother window.
    #[arg(long, default_value = "20")]
    concurrency_size: usize,

    /// Worker count seeded when traffic exists but the pool is stopped.
    #[arg(long, default_value = "1.0")]
    initial_guess: f64,

    /// Compute setpoints without applying them.
    #[arg(long)]
    dry_run: bool,

    /// Stop after this many seconds; 0 runs until Ctrl-C.
    #[arg(long, default_value = "0")]
    duration_secs: u64,

    /// Seconds between status lines.
    #[arg(long, default_value = "5")]
    status_secs: u64,
}

/// Simulated worker-pool flags.
#[derive(Args)]
struct PoolArgs {
    /// Log-mean of the per-message service time, in log-units.
    #[arg(long, default_value = "4.6")]
    service_log_mu: f64,

    /// Log-sigma of the per-message service time.
    #[arg(long, default_value = "0.5")]
    service_log_sigma: f64,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the controller with generated log-normal traffic.
    Simulate {
        #[command(flatten)]
        control: ControlArgs,

        #[command(flatten)]
        pool: PoolArgs,

        /// Log-mean of the inter-arrival gap, in log-units.
        #[arg(long, default_value = "2.3")]
        gen_log_mu: f64,

        /// Log-sigma of the inter-arrival gap.
        #[arg(long, default_value = "0.5")]
        gen_log_sigma: f64,

        /// Messages already waiting at start.
        #[arg(long, default_value = "0")]
        initial_backlog: u64,

        /// Record the arrival stream to this trace file.
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// Drive the controller by replaying a recorded arrival trace.
    Replay {
        #[command(flatten)]
        control: ControlArgs,

        #[command(flatten)]
        pool: PoolArgs,

        /// Trace file produced by `simulate --record`.
        #[arg(long)]
        trace: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,draind=debug,drainctl=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            control,
            pool,
            gen_log_mu,
            gen_log_sigma,
            initial_backlog,
            record,
        } => {
            run_simulate(
                control,
                pool,
                gen_log_mu,
                gen_log_sigma,
                initial_backlog,
                record,
            )
            .await
        }
        Command::Replay {
            control,
            pool,
            trace,
        } => run_replay(control, pool, trace).await,
    }
}

impl ControlArgs {
    fn unit(&self) -> Duration {
        Duration::from_millis(self.unit_ms)
    }

    fn control_config(&self) -> ControlConfig {
        ControlConfig {
            period: self.period,
            drain_horizon: self.drain_horizon,
            unit: self.unit(),
            ema_size: self.ema_size,
            emi_size: self.emi_size,
            concurrency_size: self.concurrency_size,
            initial_guess: self.initial_guess,
            dry_run: self.dry_run,
        }
    }
}

impl PoolArgs {
    fn service(&self) -> ServiceProfile {
        ServiceProfile {
            log_mu: self.service_log_mu,
            log_sigma: self.service_log_sigma,
        }
    }
}

async fn run_simulate(
    control: ControlArgs,
    pool: PoolArgs,
    gen_log_mu: f64,
    gen_log_sigma: f64,
    initial_backlog: u64,
    record_to: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("draind starting in simulate mode");

    let unit = control.unit();
    let (plant, driver) = sim_plant(SimConfig {
        service: pool.service(),
        unit,
        initial_backlog,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver_handle = tokio::spawn(driver.run(shutdown_rx.clone()));

    // Arrival path: generator, optionally teed through a trace recorder.
    let mut writer_handle = None;
    let sink = match &record_to {
        Some(path) => {
            let (sink, writer) = record(path, initial_backlog, plant.messages())?;
            info!(path = %path.display(), "recording arrival trace");
            writer_handle = Some(writer);
            sink
        }
        None => plant.messages(),
    };
    let generator = Generator::new(sink, gen_log_mu, gen_log_sigma, unit);
    let generator_handle = generator.start(shutdown_rx.clone());

    let controller = Controller::new(plant.clone(), control.control_config())?;
    let status = controller.status();
    let control_handle = tokio::spawn(controller.run(shutdown_rx.clone()));

    let status_handle = tokio::spawn(status_loop(
        plant.clone(),
        status,
        Duration::from_secs(control.status_secs),
        shutdown_rx,
    ));

    wait_for_exit(control.duration_secs).await;
    let _ = shutdown_tx.send(true);

    let _ = generator_handle.await;
    // The generator holds the recorder's sink open; release it so the
    // writer can finish the file.
    drop(generator);
    if let Some(writer) = writer_handle {
        writer.await??;
    }
    let _ = control_handle.await;
    let _ = driver_handle.await;
    let _ = status_handle.await;

    info!("draind stopped");
    Ok(())
}

async fn run_replay(control: ControlArgs, pool: PoolArgs, trace: PathBuf) -> anyhow::Result<()> {
    let replayer = TraceReplayer::open(&trace)?;
    let initial_backlog = replayer.initial_backlog();
    info!(path = %trace.display(), initial_backlog, "draind starting in replay mode");

    let unit = control.unit();
    let (plant, driver) = sim_plant(SimConfig {
        service: pool.service(),
        unit,
        initial_backlog,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver_handle = tokio::spawn(driver.run(shutdown_rx.clone()));

    let replay_handle = tokio::spawn(replayer.replay(plant.messages()));

    let controller = Controller::new(plant.clone(), control.control_config())?;
    let status = controller.status();
    let control_handle = tokio::spawn(controller.run(shutdown_rx.clone()));

    let status_handle = tokio::spawn(status_loop(
        plant.clone(),
        status,
        Duration::from_secs(control.status_secs),
        shutdown_rx,
    ));

    // Run until the trace is exhausted and the backlog drained, or until
    // the operator gives up.
    tokio::select! {
        _ = wait_for_exit(control.duration_secs) => {}
        result = replay_handle => {
            result??;
            info!("trace exhausted, draining the backlog");
            while plant.in_system() > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            info!("backlog drained");
        }
    }
    let _ = shutdown_tx.send(true);

    let _ = control_handle.await;
    let _ = driver_handle.await;
    let _ = status_handle.await;

    info!("draind stopped");
    Ok(())
}

async fn status_loop(
    plant: SimPlant,
    status: watch::Receiver<ControlStatus>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {
                let s = *status.borrow();
                info!(
                    backlog = plant.backlog(),
                    in_flight = plant.in_system().saturating_sub(plant.backlog()),
                    workers = plant.workers(),
                    arrivals = plant.arrivals(),
                    departures = plant.departures(),
                    arrival_rate = s.arrival_rate,
                    departure_rate = s.departure_rate,
                    setpoint = s.setpoint,
                    burst = s.burst,
                    "status"
                );
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn wait_for_exit(duration_secs: u64) {
    if duration_secs == 0 {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        return;
    }
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        _ = tokio::time::sleep(Duration::from_secs(duration_secs)) => info!("run duration elapsed"),
    }
}
