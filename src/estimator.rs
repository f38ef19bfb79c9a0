//! One control cycle of the attitude estimator.
//!
//! `step` is pure computation over `PipelineState`; clocks, sockets and
//! threads live in the control loop and telemetry, which only see
//! `Estimate` snapshots.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AcsError, AcsResult};
use crate::fast_math::{cross, is_finite, mat_vec_mul, norm, norm2, normalize, InvSqrtMode};
use crate::filters::bessel::{BesselKernel, BesselParams};
use crate::mode::{AcsMode, InertiaTensor, ModeState, Targets, REFERENCE_MOI};
use crate::ring_buffer::{FieldBuffer, FieldRateBuffer, OmegaBuffer, SunBuffer};
use crate::types::{
    CssLux, RawSample, Vec3d, Vec3f, CSS_NEG_X, CSS_NEG_Y, CSS_NEG_Z_A, CSS_NEG_Z_B, CSS_POS_X,
    CSS_POS_Y, CSS_POS_Z,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    // ── Timing ──
    pub loop_period_us: u64,

    // ── Filter bank ──
    pub bessel: BesselParams,
    pub filter_enabled: bool,

    // ── Sun sensing ──
    pub night_lux_threshold: f32,

    // ── Inertia / targets ──
    pub inertia: [[f32; 3]; 3],
    pub target_omega: [f32; 3],
    pub inertia_correction: bool,

    // ── Numerics ──
    pub inv_sqrt: InvSqrtMode,
    /// Rescale each raw field sample to this magnitude before buffering.
    pub field_scale: Option<f64>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            loop_period_us: 100_000,
            bessel: BesselParams::default(),
            filter_enabled: true,
            night_lux_threshold: 500.0,
            inertia: REFERENCE_MOI,
            target_omega: [0.0, 0.0, 1.0],
            inertia_correction: false,
            inv_sqrt: InvSqrtMode::Fast,
            field_scale: None,
        }
    }
}

impl EstimatorConfig {
    pub fn load(path: impl AsRef<Path>) -> AcsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn validate(&self) -> AcsResult<()> {
        if self.loop_period_us == 0 {
            return Err(AcsError::InvalidConfig(
                "loop_period_us must be positive".to_string(),
            ));
        }
        if !(self.night_lux_threshold.is_finite() && self.night_lux_threshold >= 0.0) {
            return Err(AcsError::InvalidConfig(format!(
                "night_lux_threshold must be finite and non-negative, got {}",
                self.night_lux_threshold
            )));
        }
        if let Some(scale) = self.field_scale {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(AcsError::InvalidConfig(format!(
                    "field_scale must be finite and positive, got {}",
                    scale
                )));
            }
        }
        if !(self.bessel.cutoff.is_finite() && self.bessel.cutoff > 0.0) {
            return Err(AcsError::InvalidConfig(format!(
                "bessel.cutoff must be finite and positive, got {}",
                self.bessel.cutoff
            )));
        }
        if !(self.bessel.min_weight.is_finite() && self.bessel.min_weight >= 0.0) {
            return Err(AcsError::InvalidConfig(format!(
                "bessel.min_weight must be finite and non-negative, got {}",
                self.bessel.min_weight
            )));
        }
        self.inertia_tensor()?;
        Ok(())
    }

    pub fn loop_period(&self) -> Duration {
        Duration::from_micros(self.loop_period_us)
    }

    /// Samples per second.
    pub fn sample_frequency(&self) -> f64 {
        1e6 / self.loop_period_us as f64
    }

    pub fn inertia_tensor(&self) -> AcsResult<InertiaTensor> {
        InertiaTensor::from_rows(self.inertia)
    }

    /// Bessel kernel, or the identity kernel when filtering is disabled.
    pub fn build_kernel(&self) -> AcsResult<BesselKernel> {
        if self.filter_enabled {
            BesselKernel::derive(self.bessel)
        } else {
            Ok(BesselKernel::identity())
        }
    }
}

// ─── Cycle outcome ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    /// Not enough history to estimate ω and the sun vector yet.
    Priming,
    Success,
    /// A freshly written output is non-finite. Buffers keep what was written.
    Fault,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantity {
    Field,
    FieldRate,
    Omega,
    Sun,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Produced {
    pub field_rate: bool,
    pub omega: bool,
    pub sun: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub status: CycleStatus,
    pub produced: Produced,
    /// First quantity found non-finite, if any.
    pub fault: Option<Quantity>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub priming: u64,
    pub success: u64,
    pub fault: u64,
}

/// Latest filtered outputs, as read by telemetry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Estimate {
    pub cycle: u64,
    pub timestamp: f64,
    pub status: CycleStatus,
    pub field: Vec3d,
    pub field_rate: Vec3d,
    pub omega: Vec3f,
    pub sun: Vec3f,
    pub night: bool,
    pub first_detumble: bool,
    pub mode: AcsMode,
    pub stats: CycleStats,
}

impl Default for Estimate {
    fn default() -> Self {
        Self {
            cycle: 0,
            timestamp: 0.0,
            status: CycleStatus::Priming,
            field: Vec3d::zeros(),
            field_rate: Vec3d::zeros(),
            omega: Vec3f::zeros(),
            sun: Vec3f::zeros(),
            night: false,
            first_detumble: true,
            mode: AcsMode::Detumble,
            stats: CycleStats::default(),
        }
    }
}

// ─── Pipeline state ──────────────────────────────────────────────────────────

/// Everything the estimator mutates from cycle to cycle.
#[derive(Clone, Debug)]
pub struct PipelineState {
    pub field: FieldBuffer,
    pub field_rate: FieldRateBuffer,
    pub omega: OmegaBuffer,
    pub sun: SunBuffer,
    pub cycle: u64,
    pub last_timestamp: f64,
    pub last_status: CycleStatus,
    pub mode: ModeState,
    pub inertia: InertiaTensor,
    pub targets: Targets,
    pub stats: CycleStats,
}

impl PipelineState {
    pub fn new(config: &EstimatorConfig) -> AcsResult<Self> {
        let inertia = config.inertia_tensor()?;
        let targets = Targets::new(&inertia, Vec3f::from(config.target_omega));
        Ok(Self {
            field: FieldBuffer::new(),
            field_rate: FieldRateBuffer::new(),
            omega: OmegaBuffer::new(),
            sun: SunBuffer::new(),
            cycle: 0,
            last_timestamp: 0.0,
            last_status: CycleStatus::Priming,
            mode: ModeState::new(),
            inertia,
            targets,
            stats: CycleStats::default(),
        })
    }

    /// Drop all history so the next cycles re-prime. Counters, targets and
    /// the first-detumble flag survive.
    pub fn flush_all(&mut self) {
        self.field.reset();
        self.field_rate.reset();
        self.omega.reset();
        self.sun.reset();
        self.mode.latch_night(false);
        self.last_status = CycleStatus::Priming;
        log::info!("[ACS] Buffers flushed at cycle {}", self.cycle);
    }

    pub fn estimate(&self) -> Estimate {
        Estimate {
            cycle: self.cycle,
            timestamp: self.last_timestamp,
            status: self.last_status,
            field: self.field.latest().unwrap_or_else(Vec3d::zeros),
            field_rate: self.field_rate.latest().unwrap_or_else(Vec3d::zeros),
            omega: self.omega.latest().unwrap_or_else(Vec3f::zeros),
            sun: self.sun.latest().unwrap_or_else(Vec3f::zeros),
            night: self.mode.night(),
            first_detumble: self.mode.first_detumble(),
            mode: self.mode.mode(),
            stats: self.stats,
        }
    }
}

// ─── Estimators ──────────────────────────────────────────────────────────────

/// Ḃ-dot angular velocity: `ω = (Ḃ[t] × Ḃ[t-1]) · F / |Ḃ[t-1]|²`.
/// Non-finite when `Ḃ[t-1]` is null.
pub fn bdot_omega(rate_now: &Vec3d, rate_prev: &Vec3d, frequency: f64) -> Vec3f {
    let scale = frequency / norm2(rate_prev);
    (cross(rate_now, rate_prev) * scale).map(|c| c as f32)
}

/// Inertia-coupling term `-F · I⁻¹ (ω × Iω)` for the previous ω.
pub fn inertia_correction(inertia: &InertiaTensor, omega_prev: &Vec3f, frequency: f32) -> Vec3f {
    let momentum = inertia.momentum(omega_prev);
    let gyroscopic = cross(omega_prev, &momentum);
    mat_vec_mul(inertia.inverse(), &gyroscopic) * -frequency
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SunEstimate {
    pub vector: Vec3f,
    /// Norm of the differential lux vector.
    pub illumination: f32,
    pub night: bool,
}

/// Sun direction from the coarse sun sensors: differential lux between
/// opposing faces, normalized, or null below the illumination threshold.
pub fn sun_vector(lux: &CssLux, threshold: f32, mode: InvSqrtMode) -> SunEstimate {
    let neg_z = 0.5 * (lux[CSS_NEG_Z_A] + lux[CSS_NEG_Z_B]);
    let raw = Vec3f::new(
        lux[CSS_POS_X] - lux[CSS_NEG_X],
        lux[CSS_POS_Y] - lux[CSS_NEG_Y],
        lux[CSS_POS_Z] - neg_z,
    );
    let illumination = norm(&raw);

    if !illumination.is_finite() {
        // Keep the bad reading visible to the fault check.
        return SunEstimate {
            vector: raw,
            illumination,
            night: false,
        };
    }
    if illumination < threshold {
        return SunEstimate {
            vector: Vec3f::zeros(),
            illumination,
            night: true,
        };
    }
    SunEstimate {
        vector: normalize(&raw, mode),
        illumination,
        night: false,
    }
}

// ─── The cycle ───────────────────────────────────────────────────────────────

/// Run one control cycle on `sample`.
pub fn step(
    state: &mut PipelineState,
    kernel: &BesselKernel,
    config: &EstimatorConfig,
    sample: &RawSample,
) -> CycleReport {
    state.cycle += 1;
    state.last_timestamp = sample.timestamp();
    let frequency = config.sample_frequency();
    let mut produced = Produced::default();
    let mut fault = None;
    let mut check = |ok: bool, quantity: Quantity| {
        if !ok && fault.is_none() {
            fault = Some(quantity);
        }
    };

    // 1. Field
    let mut raw_field = sample.mag.as_vector();
    if let Some(scale) = config.field_scale {
        raw_field = normalize(&raw_field, config.inv_sqrt) * scale;
    }
    let b_idx = state.field.push(raw_field);
    let field = kernel.apply_in_place(&mut state.field, b_idx);
    check(is_finite(&field), Quantity::Field);
    log::trace!(
        "[ACS] cycle {} field[{}] = ({:.3}, {:.3}, {:.3})",
        state.cycle,
        b_idx,
        field.x,
        field.y,
        field.z
    );

    // 2. Field rate, once two field samples exist
    if state.field.len() >= 2 {
        let prev = state.field.get(FieldBuffer::previous_index(b_idx, 1));
        let r_idx = state.field_rate.push((field - prev) * frequency);
        let rate = kernel.apply_in_place(&mut state.field_rate, r_idx);
        produced.field_rate = true;
        check(is_finite(&rate), Quantity::FieldRate);

        // 3. ω and sun vector, once two field-rate samples exist
        if state.field_rate.len() >= 2 {
            let rate_prev = state
                .field_rate
                .get(FieldRateBuffer::previous_index(r_idx, 1));
            let mut omega = bdot_omega(&rate, &rate_prev, frequency);
            if config.inertia_correction {
                // A faulted ω from the last cycle would otherwise feed back forever.
                if let Some(omega_prev) = state.omega.latest().filter(|w| is_finite(w)) {
                    omega += inertia_correction(&state.inertia, &omega_prev, frequency as f32);
                }
            }
            let w_idx = state.omega.push(omega);
            let omega = kernel.apply_in_place(&mut state.omega, w_idx);
            produced.omega = true;
            check(is_finite(&omega), Quantity::Omega);

            let sun = sun_vector(&sample.css.lux, config.night_lux_threshold, config.inv_sqrt);
            state.mode.latch_night(sun.night);
            state.sun.push(sun.vector);
            produced.sun = true;
            check(is_finite(&sun.vector), Quantity::Sun);
        }
    }

    let status = if fault.is_some() {
        CycleStatus::Fault
    } else if produced.omega {
        CycleStatus::Success
    } else {
        CycleStatus::Priming
    };

    match status {
        CycleStatus::Priming => state.stats.priming += 1,
        CycleStatus::Success => state.stats.success += 1,
        CycleStatus::Fault => {
            state.stats.fault += 1;
            log::warn!(
                "[ACS] Numerical fault at cycle {}: non-finite {:?}",
                state.cycle,
                fault
            );
        }
    }
    state.last_status = status;

    CycleReport {
        cycle: state.cycle,
        status,
        produced,
        fault,
    }
}

/// Owns the configuration, kernel and state for a running estimator.
pub struct AttitudeEstimator {
    config: EstimatorConfig,
    kernel: BesselKernel,
    state: PipelineState,
}

impl AttitudeEstimator {
    pub fn new(config: EstimatorConfig) -> AcsResult<Self> {
        config.validate()?;
        let kernel = config.build_kernel();
        Self::from_kernel_result(config, kernel)
    }

    /// Build from the outcome of a kernel derivation. An allocation failure
    /// leaves the all-zero kernel in place, which passes samples through.
    pub fn from_kernel_result(
        config: EstimatorConfig,
        kernel: AcsResult<BesselKernel>,
    ) -> AcsResult<Self> {
        let kernel = match kernel {
            Ok(kernel) => kernel,
            Err(AcsError::KernelAllocation) => {
                log::error!(
                    "[BESSEL] Kernel allocation failed, running unfiltered (order {})",
                    config.bessel.order
                );
                BesselKernel::zeroed(config.bessel)
            }
            Err(e) => return Err(e),
        };
        Self::with_kernel(config, kernel)
    }

    pub fn with_kernel(config: EstimatorConfig, kernel: BesselKernel) -> AcsResult<Self> {
        config.validate()?;
        let state = PipelineState::new(&config)?;
        Ok(Self {
            config,
            kernel,
            state,
        })
    }

    pub fn step(&mut self, sample: &RawSample) -> CycleReport {
        step(&mut self.state, &self.kernel, &self.config, sample)
    }

    /// Re-derive the kernel with new parameters. On failure the current
    /// kernel keeps running.
    pub fn reconfigure_filter(&mut self, params: BesselParams) -> AcsResult<()> {
        self.kernel.rederive(params)?;
        self.config.bessel = self.kernel.params();
        Ok(())
    }

    pub fn estimate(&self) -> Estimate {
        self.state.estimate()
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn kernel(&self) -> &BesselKernel {
        &self.kernel
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut PipelineState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn unfiltered() -> EstimatorConfig {
        EstimatorConfig {
            filter_enabled: false,
            ..EstimatorConfig::default()
        }
    }

    fn day_lux() -> CssLux {
        [3000.0, -3000.0, 0.0, 0.0, 4000.0, -4000.0, -4000.0]
    }

    fn sample(t: f64, field: Vec3d) -> RawSample {
        RawSample::new(t, field, day_lux())
    }

    #[test]
    fn test_bdot_estimator_closed_form() {
        let f = 10.0;
        let omega = bdot_omega(&Vec3d::new(1.0, 0.0, 0.0), &Vec3d::new(0.0, 0.0, 1.0), f);
        assert_eq!(omega, Vec3f::new(0.0, -10.0, 0.0));

        let omega = bdot_omega(&Vec3d::new(0.0, 2.0, 0.0), &Vec3d::new(2.0, 0.0, 0.0), f);
        // (0,2,0) × (2,0,0) = (0,0,-4), / |(2,0,0)|² = 4
        assert_eq!(omega, Vec3f::new(0.0, 0.0, -10.0));
    }

    #[test]
    fn test_bdot_null_previous_rate_is_non_finite() {
        let omega = bdot_omega(&Vec3d::new(1.0, 0.0, 0.0), &Vec3d::zeros(), 10.0);
        assert!(!is_finite(&omega));
    }

    #[test]
    fn test_sun_vector_night_below_threshold() {
        let lux = [100.0, 0.0, 50.0, 0.0, 20.0, 0.0, 0.0];
        let sun = sun_vector(&lux, 500.0, InvSqrtMode::Fast);
        assert!(sun.night);
        assert_eq!(sun.vector, Vec3f::zeros());
        assert!(sun.illumination < 500.0);
    }

    #[test]
    fn test_sun_vector_day_is_unit() {
        for mode in [InvSqrtMode::Fast, InvSqrtMode::Exact] {
            let sun = sun_vector(&day_lux(), 500.0, mode);
            assert!(!sun.night);
            assert_relative_eq!(norm(&sun.vector), 1.0, max_relative = 1e-5);
            // (6000, 0, 8000) / 10000
            assert_abs_diff_eq!(sun.vector, Vec3f::new(0.6, 0.0, 0.8), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_sun_vector_at_threshold_is_day() {
        let lux = [500.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let sun = sun_vector(&lux, 500.0, InvSqrtMode::Exact);
        assert!(!sun.night);
        assert_relative_eq!(sun.vector, Vec3f::new(1.0, 0.0, 0.0), max_relative = 1e-6);
    }

    #[test]
    fn test_sun_vector_averages_negative_z_pair() {
        let lux = [0.0, 0.0, 0.0, 0.0, 1000.0, 0.0, -2000.0];
        let sun = sun_vector(&lux, 500.0, InvSqrtMode::Exact);
        assert_relative_eq!(sun.illumination, 2000.0);
        assert_relative_eq!(sun.vector, Vec3f::new(0.0, 0.0, 1.0), max_relative = 1e-6);
    }

    #[test]
    fn test_priming_sequence() {
        let config = unfiltered();
        let kernel = config.build_kernel().unwrap();
        let mut state = PipelineState::new(&config).unwrap();

        let r1 = step(&mut state, &kernel, &config, &sample(0.1, Vec3d::new(10.0, 0.0, 0.0)));
        assert_eq!(r1.status, CycleStatus::Priming);
        assert_eq!(r1.produced, Produced::default());

        let r2 = step(&mut state, &kernel, &config, &sample(0.2, Vec3d::new(10.0, 1.0, 0.0)));
        assert_eq!(r2.status, CycleStatus::Priming);
        assert!(r2.produced.field_rate && !r2.produced.omega && !r2.produced.sun);
        assert_relative_eq!(state.field_rate.latest().unwrap(), Vec3d::new(0.0, 10.0, 0.0));

        let r3 = step(&mut state, &kernel, &config, &sample(0.3, Vec3d::new(9.0, 1.0, 0.0)));
        assert_eq!(r3.status, CycleStatus::Success);
        assert!(r3.produced.omega && r3.produced.sun);
        assert_eq!(state.stats, CycleStats { priming: 2, success: 1, fault: 0 });
        assert_eq!(state.estimate().cycle, 3);
    }

    #[test]
    fn test_pipeline_omega_matches_closed_form() {
        // Field steps chosen so that Ḃ[t-1] = (0,0,F) and Ḃ[t] = (F,0,0).
        let config = unfiltered();
        let f = config.sample_frequency();
        let kernel = config.build_kernel().unwrap();
        let mut state = PipelineState::new(&config).unwrap();
        step(&mut state, &kernel, &config, &sample(0.1, Vec3d::new(0.0, 0.0, 0.0)));
        step(&mut state, &kernel, &config, &sample(0.2, Vec3d::new(0.0, 0.0, 1.0)));
        let report = step(&mut state, &kernel, &config, &sample(0.3, Vec3d::new(1.0, 0.0, 1.0)));
        assert_eq!(report.status, CycleStatus::Success);
        // (F,0,0) × (0,0,F) · F / F² = (0,-F,0)
        assert_relative_eq!(
            state.omega.latest().unwrap(),
            Vec3f::new(0.0, -f as f32, 0.0),
            max_relative = 1e-6
        );
    }

    #[test]
    fn test_constant_field_faults_then_recovers() {
        let config = unfiltered();
        let kernel = config.build_kernel().unwrap();
        let mut state = PipelineState::new(&config).unwrap();
        let b = Vec3d::new(5.0, 5.0, 5.0);
        step(&mut state, &kernel, &config, &sample(0.1, b));
        step(&mut state, &kernel, &config, &sample(0.2, b));
        let report = step(&mut state, &kernel, &config, &sample(0.3, b));
        assert_eq!(report.status, CycleStatus::Fault);
        assert_eq!(report.fault, Some(Quantity::Omega));
        assert!(!is_finite(&state.omega.latest().unwrap()));

        // Field starts moving: Ḃ[t-1] is still null, so one more fault.
        let report = step(&mut state, &kernel, &config, &sample(0.4, Vec3d::new(6.0, 5.0, 5.0)));
        assert_eq!(report.status, CycleStatus::Fault);
        let report = step(&mut state, &kernel, &config, &sample(0.5, Vec3d::new(6.0, 6.0, 5.0)));
        assert_eq!(report.status, CycleStatus::Success);
    }

    #[test]
    fn test_night_flag_follows_illumination() {
        let config = unfiltered();
        let kernel = config.build_kernel().unwrap();
        let mut state = PipelineState::new(&config).unwrap();
        let dark = [10.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let fields = [
            Vec3d::new(10.0, 0.0, 0.0),
            Vec3d::new(10.0, 1.0, 0.0),
            Vec3d::new(9.0, 2.0, 0.0),
            Vec3d::new(8.0, 2.0, 1.0),
        ];
        for (i, b) in fields.iter().take(3).enumerate() {
            step(&mut state, &kernel, &config, &RawSample::new(i as f64, *b, dark));
        }
        assert!(state.mode.night());
        assert_eq!(state.sun.latest(), Some(Vec3f::zeros()));

        step(&mut state, &kernel, &config, &sample(3.0, fields[3]));
        assert!(!state.mode.night());
        assert_relative_eq!(norm(&state.sun.latest().unwrap()), 1.0, max_relative = 1e-5);
    }

    #[test]
    fn test_non_finite_field_reports_fault_while_priming() {
        let config = unfiltered();
        let kernel = config.build_kernel().unwrap();
        let mut state = PipelineState::new(&config).unwrap();
        let report = step(
            &mut state,
            &kernel,
            &config,
            &sample(0.1, Vec3d::new(f64::NAN, 0.0, 0.0)),
        );
        assert_eq!(report.status, CycleStatus::Fault);
        assert_eq!(report.fault, Some(Quantity::Field));
    }

    #[test]
    fn test_field_scale_normalizes_input() {
        let config = EstimatorConfig {
            field_scale: Some(600.0),
            ..unfiltered()
        };
        let kernel = config.build_kernel().unwrap();
        let mut state = PipelineState::new(&config).unwrap();
        step(&mut state, &kernel, &config, &sample(0.1, Vec3d::new(0.0, 30.0, 40.0)));
        assert_relative_eq!(
            state.field.latest().unwrap(),
            Vec3d::new(0.0, 360.0, 480.0),
            max_relative = 1e-4
        );
    }

    #[test]
    fn test_inertia_correction_zero_for_principal_axis_spin() {
        let inertia = InertiaTensor::default();
        let corr = inertia_correction(&inertia, &Vec3f::new(0.0, 0.0, 1.0), 10.0);
        assert_abs_diff_eq!(corr, Vec3f::zeros(), epsilon = 1e-6);

        let corr = inertia_correction(&inertia, &Vec3f::new(1.0, 1.0, 0.0), 10.0);
        assert!(corr.z.abs() > 0.0);
    }

    #[test]
    fn test_inertia_correction_recovers_after_fault() {
        let config = EstimatorConfig {
            inertia_correction: true,
            ..EstimatorConfig::default()
        };
        let mut estimator = AttitudeEstimator::new(config).unwrap();
        let field = |i: usize| {
            let a = i as f64 * 0.05;
            Vec3d::new(20.0 * a.cos(), 20.0 * a.sin(), 5.0)
        };
        for i in 0..10 {
            let report = estimator.step(&sample(i as f64 * 0.1, field(i)));
            assert_ne!(report.status, CycleStatus::Fault);
        }

        let state = estimator.state_mut();
        let cursor = state.field_rate.cursor().unwrap();
        state.field_rate.set(cursor, Vec3d::zeros());
        let report = estimator.step(&sample(1.0, field(10)));
        assert_eq!(report.fault, Some(Quantity::Omega));

        for i in 11..15 {
            let report = estimator.step(&sample(i as f64 * 0.1, field(i)));
            assert_eq!(report.status, CycleStatus::Success, "cycle {}", i);
            assert!(is_finite(&estimator.estimate().omega));
        }
    }

    #[test]
    fn test_kernel_allocation_failure_runs_unfiltered() {
        let config = EstimatorConfig::default();
        let mut estimator =
            AttitudeEstimator::from_kernel_result(config, Err(AcsError::KernelAllocation)).unwrap();
        assert!(estimator.kernel().weights().iter().all(|&w| w == 0.0));

        for i in 0..4 {
            let b = Vec3d::new(10.0 * (i as f64 * 0.3).cos(), 10.0 * (i as f64 * 0.3).sin(), 1.0);
            estimator.step(&sample(i as f64 * 0.1, b));
        }
        let raw = Vec3d::new(10.0 * 1.2f64.cos(), 10.0 * 1.2f64.sin(), 1.0);
        let report = estimator.step(&sample(0.4, raw));
        assert_eq!(report.status, CycleStatus::Success);
        assert_relative_eq!(estimator.estimate().field, raw, max_relative = 1e-12);
    }

    #[test]
    fn test_kernel_result_propagates_other_errors() {
        let result = AttitudeEstimator::from_kernel_result(
            EstimatorConfig::default(),
            Err(AcsError::InvalidConfig("order".into())),
        );
        assert!(matches!(result, Err(AcsError::InvalidConfig(_))));
    }

    #[test]
    fn test_flush_all_reprimes() {
        let config = unfiltered();
        let mut estimator = AttitudeEstimator::new(config).unwrap();
        for i in 0..5 {
            let b = Vec3d::new(10.0 * (i as f64 * 0.3).cos(), 10.0 * (i as f64 * 0.3).sin(), 1.0);
            estimator.step(&sample(i as f64, b));
        }
        estimator.state_mut().mode.clear_first_detumble();
        estimator.state_mut().flush_all();
        assert!(estimator.state().field.is_empty());
        assert!(!estimator.state().mode.first_detumble());
        let report = estimator.step(&sample(6.0, Vec3d::new(1.0, 2.0, 3.0)));
        assert_eq!(report.status, CycleStatus::Priming);
        assert_eq!(report.cycle, 6);
    }

    #[test]
    fn test_config_validation() {
        assert!(EstimatorConfig::default().validate().is_ok());

        let bad_period = EstimatorConfig {
            loop_period_us: 0,
            ..EstimatorConfig::default()
        };
        assert!(matches!(bad_period.validate(), Err(AcsError::InvalidConfig(_))));

        let mut bad_cutoff = EstimatorConfig::default();
        bad_cutoff.bessel.cutoff = f32::NAN;
        assert!(bad_cutoff.validate().is_err());

        let bad_scale = EstimatorConfig {
            field_scale: Some(-1.0),
            ..EstimatorConfig::default()
        };
        assert!(bad_scale.validate().is_err());
    }

    #[test]
    fn test_config_json_defaults_fill_missing_fields() {
        let config: EstimatorConfig =
            serde_json::from_str(r#"{ "loop_period_us": 50000, "inv_sqrt": "exact" }"#).unwrap();
        assert_eq!(config.loop_period_us, 50_000);
        assert_eq!(config.inv_sqrt, InvSqrtMode::Exact);
        assert_eq!(config.bessel, BesselParams::default());
        assert_relative_eq!(config.sample_frequency(), 20.0);
    }

    #[test]
    fn test_reconfigure_filter_keeps_kernel_on_error() {
        let mut estimator = AttitudeEstimator::new(EstimatorConfig::default()).unwrap();
        let before = estimator.kernel().weights().to_vec();
        let bad = BesselParams {
            cutoff: -1.0,
            ..BesselParams::default()
        };
        assert!(estimator.reconfigure_filter(bad).is_err());
        assert_eq!(estimator.kernel().weights(), &before[..]);

        let good = BesselParams {
            order: 2,
            ..BesselParams::default()
        };
        estimator.reconfigure_filter(good).unwrap();
        assert_eq!(estimator.config().bessel.order, 2);
    }
}
