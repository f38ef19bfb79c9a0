//! Fixed-period control worker.
//!
//! One dedicated thread owns the estimator and is the only writer of its
//! buffers. After every cycle it publishes a complete `Estimate` through a
//! watch channel, so readers always see one whole cycle and never hold the
//! writer up.

use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{bounded, select, tick, Receiver, Sender};
use tokio::sync::watch;

use crate::error::{AcsError, AcsResult};
use crate::estimator::{AttitudeEstimator, CycleReport, CycleStats, CycleStatus, Estimate};
use crate::sensors::SensorSource;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopSummary {
    pub cycles: u64,
    pub stats: CycleStats,
    pub sensor_errors: u64,
    pub overruns: u64,
    pub last: Estimate,
}

pub struct ControlLoop<S: SensorSource> {
    estimator: AttitudeEstimator,
    source: S,
    estimates: watch::Sender<Estimate>,
    max_cycles: Option<u64>,
    sensor_errors: u64,
    overruns: u64,
}

impl<S: SensorSource + 'static> ControlLoop<S> {
    pub fn new(estimator: AttitudeEstimator, source: S, estimates: watch::Sender<Estimate>) -> Self {
        Self {
            estimator,
            source,
            estimates,
            max_cycles: None,
            sensor_errors: 0,
            overruns: 0,
        }
    }

    /// Stop on its own after this many cycles (warm-up excluded).
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn estimator(&self) -> &AttitudeEstimator {
        &self.estimator
    }

    /// Run `cycles` back-to-back cycles without waiting on the clock and
    /// without publishing, to prime the buffers before telemetry starts.
    pub fn warm_up(&mut self, cycles: usize) -> AcsResult<()> {
        for _ in 0..cycles {
            let sample = self.source.read()?;
            self.estimator.step(&sample);
        }
        log::info!(
            "[ACS] Warm-up done: {} cycles, status {:?}",
            cycles,
            self.estimator.state().last_status
        );
        Ok(())
    }

    /// Read one sample, run one cycle, publish the snapshot.
    pub fn run_once(&mut self) -> AcsResult<CycleReport> {
        let sample = self.source.read()?;
        let report = self.estimator.step(&sample);
        self.estimates.send_replace(self.estimator.estimate());
        Ok(report)
    }

    /// Cycle on every tick until `shutdown` fires or the cycle limit is hit.
    /// A shutdown request is only seen between cycles.
    pub fn run(mut self, ticker: Receiver<Instant>, shutdown: Receiver<()>) -> LoopSummary {
        let period = self.estimator.config().loop_period();
        let mut cycles = 0u64;

        loop {
            select! {
                recv(ticker) -> msg => {
                    let Ok(due) = msg else { break };
                    match self.run_once() {
                        Ok(report) => {
                            cycles += 1;
                            if report.status == CycleStatus::Fault {
                                log::debug!("[ACS] cycle {} fault {:?}", report.cycle, report.fault);
                            }
                        }
                        Err(e) => {
                            self.sensor_errors += 1;
                            if self.sensor_errors == 1 || self.sensor_errors % 100 == 0 {
                                log::warn!("[SENSOR] Read failed ({} total): {}", self.sensor_errors, e);
                            }
                        }
                    }
                    if due.elapsed() > period {
                        self.overruns += 1;
                        log::warn!("[ACS] Cycle overran the {:?} period", period);
                    }
                    if self.max_cycles.map_or(false, |max| cycles >= max) {
                        break;
                    }
                }
                recv(shutdown) -> _ => {
                    log::info!("[ACS] Shutdown requested after {} cycles", cycles);
                    break;
                }
            }
        }

        let state = self.estimator.state();
        LoopSummary {
            cycles,
            stats: state.stats,
            sensor_errors: self.sensor_errors,
            overruns: self.overruns,
            last: self.estimator.estimate(),
        }
    }

    /// Run the loop on its own thread, ticking at the configured period.
    pub fn spawn(self) -> AcsResult<LoopHandle> {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let ticker = tick(self.estimator.config().loop_period());
        let thread = thread::Builder::new()
            .name("acs-control".to_string())
            .spawn(move || self.run(ticker, shutdown_rx))?;
        Ok(LoopHandle {
            shutdown: shutdown_tx,
            thread,
        })
    }
}

pub struct LoopHandle {
    shutdown: Sender<()>,
    thread: JoinHandle<LoopSummary>,
}

impl LoopHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Ask the worker to stop after its current cycle and wait for it.
    pub fn stop(self) -> AcsResult<LoopSummary> {
        // Already gone if the cycle limit ended the loop.
        let _ = self.shutdown.try_send(());
        self.thread.join().map_err(|_| {
            log::error!("[ACS] Control thread panicked");
            AcsError::ChannelClosed
        })
    }
}
