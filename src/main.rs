use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use acs_estimator::fast_math::InvSqrtMode;
use acs_estimator::live_status::LiveStatus;
use acs_estimator::telemetry::DEFAULT_PORT;
use acs_estimator::{
    AttitudeEstimator, ControlLoop, Estimate, EstimatorConfig, SyntheticSource, TelemetryServer,
};

#[derive(Parser, Debug)]
#[command(name = "acs_estimator")]
#[command(about = "ACS attitude estimator with DataVis telemetry", long_about = None)]
struct Args {
    /// Duration in seconds (0 = run until Ctrl-C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// JSON estimator configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// DataVis TCP port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seed for the synthetic sensor source
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Noise multiplier for the synthetic sensors (0 = noiseless)
    #[arg(long, default_value = "1.0")]
    noise_scale: f64,

    /// Cycles run before telemetry starts
    #[arg(long, default_value = "10")]
    warmup_cycles: usize,

    /// Write a JSON live status here
    #[arg(long, value_name = "FILE")]
    status_file: Option<PathBuf>,

    #[arg(long, default_value = "2")]
    status_interval_secs: u64,

    /// Use the library inverse square root instead of the bit-level one
    #[arg(long)]
    exact_sqrt: bool,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let mut config = match &args.config {
        Some(path) => EstimatorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EstimatorConfig::default(),
    };
    if args.exact_sqrt {
        config.inv_sqrt = InvSqrtMode::Exact;
    }
    config.validate().context("invalid estimator configuration")?;

    log::info!("[{}] ACS estimator starting", ts_now());
    log::info!("  Duration: {} seconds (0=continuous)", args.duration);
    log::info!("  Loop period: {:?}", config.loop_period());
    log::info!(
        "  Bessel: order {}, cutoff {}, enabled {}",
        config.bessel.order,
        config.bessel.cutoff,
        config.filter_enabled
    );
    log::info!("  Inverse sqrt: {:?}", config.inv_sqrt);

    let period_s = config.loop_period().as_secs_f64();
    let estimator = AttitudeEstimator::new(config)?;
    let source = SyntheticSource::new(args.seed, period_s).with_noise_scale(args.noise_scale);

    let (estimate_tx, estimate_rx) = watch::channel(Estimate::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut control = ControlLoop::new(estimator, source, estimate_tx);
    control.warm_up(args.warmup_cycles)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let server = TelemetryServer::bind(addr)
        .await
        .with_context(|| format!("binding DataVis port {}", args.port))?;
    let client_connected = server.connected_flag();
    let server_task = tokio::spawn(server.run(estimate_rx.clone(), shutdown_rx));

    let handle = control.spawn()?;
    let start = Utc::now();
    let mut status_ticker =
        tokio::time::interval(Duration::from_secs(args.status_interval_secs.max(1)));
    let run_for = async {
        if args.duration > 0 {
            sleep(Duration::from_secs(args.duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(run_for);

    loop {
        tokio::select! {
            _ = &mut run_for => {
                log::info!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                log::info!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = status_ticker.tick() => {
                if let Some(path) = &args.status_file {
                    let mut status = LiveStatus::new();
                    status.update(&estimate_rx.borrow(), uptime(start));
                    status.telemetry_client_connected = client_connected.load(Ordering::Relaxed);
                    if let Err(e) = status.save(path) {
                        log::warn!("[STATUS] Failed to write {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    // The control thread finishes its in-flight cycle before returning.
    let summary = tokio::task::spawn_blocking(move || handle.stop()).await??;
    let _ = shutdown_tx.send(true);
    let publish = server_task.await??;

    if let Some(path) = &args.status_file {
        let mut status = LiveStatus::new();
        status.update(&summary.last, uptime(start));
        status.save(path)?;
    }

    println!("\n=== Final Stats ===");
    println!("Cycles: {}", summary.cycles + args.warmup_cycles as u64);
    println!(
        "Priming / success / fault: {} / {} / {}",
        summary.stats.priming, summary.stats.success, summary.stats.fault
    );
    println!("Sensor errors: {}", summary.sensor_errors);
    println!("Overruns: {}", summary.overruns);
    println!(
        "Last omega: ({:.4}, {:.4}, {:.4}) rad/s, night {}",
        summary.last.omega.x, summary.last.omega.y, summary.last.omega.z, summary.last.night
    );
    println!(
        "Telemetry: {} frames sent, {} dropped, {} clients",
        publish.sent, publish.dropped, publish.clients
    );

    Ok(())
}

fn uptime(start: chrono::DateTime<Utc>) -> u64 {
    Utc::now().signed_duration_since(start).num_seconds().max(0) as u64
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
