//! Sensor fusion and attitude estimation for a small-satellite ACS.
//!
//! Raw magnetometer and coarse-sun-sensor samples go in once per control
//! period; filtered field rate, Ḃ-dot angular velocity and the sun vector
//! come out, together with a per-cycle status.

pub mod control_loop;
pub mod error;
pub mod estimator;
pub mod fast_math;
pub mod filters;
pub mod live_status;
pub mod mode;
pub mod ring_buffer;
pub mod sensors;
pub mod telemetry;
pub mod types;

pub use control_loop::{ControlLoop, LoopHandle, LoopSummary};
pub use error::{AcsError, AcsResult};
pub use estimator::{
    step, AttitudeEstimator, CycleReport, CycleStatus, Estimate, EstimatorConfig, PipelineState,
};
pub use filters::{BesselKernel, BesselParams};
pub use mode::{AcsMode, InertiaTensor, ModeState};
pub use ring_buffer::RingBuffer;
pub use sensors::{ScriptedSource, SensorSource, SyntheticSource};
pub use telemetry::{TelemetryFrame, TelemetryServer};
