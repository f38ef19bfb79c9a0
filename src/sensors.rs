use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{AcsError, AcsResult};
use crate::types::{CssLux, RawSample, Vec3d, CSS_CHANNELS};

/// Anything that can hand the control loop one sample per cycle.
pub trait SensorSource: Send {
    fn read(&mut self) -> AcsResult<RawSample>;
}

/// Peak CSS reading at normal incidence, in lux.
const CSS_PEAK_LUX: f64 = 7000.0;
/// Field amplitude in the orbit plane, in sensor units.
const FIELD_AMPLITUDE: f64 = 50.0;
const SPIN_RATE: f64 = 0.5;

/// Hardware-in-the-loop stand-in: a field spinning about Z at 0.5 rad/s and
/// a sun that wobbles in elevation, both with uniform noise.
pub struct SyntheticSource {
    rng: StdRng,
    period_s: f64,
    tnow: f64,
    noise_scale: f64,
    eclipse: Option<(f64, f64)>,
    samples: u64,
}

impl SyntheticSource {
    pub fn new(seed: u64, period_s: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            period_s,
            tnow: 0.0,
            noise_scale: 1.0,
            eclipse: None,
            samples: 0,
        }
    }

    pub fn with_noise_scale(mut self, scale: f64) -> Self {
        self.noise_scale = scale;
        self
    }

    /// Dark window `[start, end)` in seconds of simulated time.
    pub fn with_eclipse(mut self, start: f64, end: f64) -> Self {
        self.eclipse = Some((start, end));
        self
    }

    pub fn time(&self) -> f64 {
        self.tnow
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    fn noise(&mut self, half_width: f64) -> f64 {
        if self.noise_scale == 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-half_width..half_width) * self.noise_scale
    }

    fn in_eclipse(&self) -> bool {
        self.eclipse
            .map_or(false, |(start, end)| self.tnow >= start && self.tnow < end)
    }

    fn field(&mut self) -> Vec3d {
        let t = self.tnow;
        Vec3d::new(
            FIELD_AMPLITUDE * (SPIN_RATE * t).sin() + self.noise(0.5),
            FIELD_AMPLITUDE * (SPIN_RATE * t).cos() + self.noise(0.5),
            self.noise(0.5),
        )
    }

    fn lux(&mut self) -> CssLux {
        let t = self.tnow;
        if self.in_eclipse() {
            let mut lux = [0.0; CSS_CHANNELS];
            for channel in lux.iter_mut() {
                *channel = self.noise(50.0).abs() as f32;
            }
            return lux;
        }

        let elevation = (15.0 * (0.1 * t).sin() + 30.0).to_radians();
        let x = CSS_PEAK_LUX * elevation.sin() * (SPIN_RATE * t).cos() + self.noise(50.0);
        let y = CSS_PEAK_LUX * elevation.sin() * (SPIN_RATE * t).sin() + self.noise(50.0);
        let z = CSS_PEAK_LUX * elevation.cos() + self.noise(50.0);
        [
            x as f32, -x as f32, y as f32, -y as f32, z as f32, -z as f32, -z as f32,
        ]
    }
}

impl SensorSource for SyntheticSource {
    fn read(&mut self) -> AcsResult<RawSample> {
        self.tnow += self.period_s;
        self.samples += 1;
        let field = self.field();
        let lux = self.lux();
        if self.samples % 100 == 0 {
            log::debug!("[SENSOR] {} synthetic samples, t = {:.1}s", self.samples, self.tnow);
        }
        Ok(RawSample::new(self.tnow, field, lux))
    }
}

/// Replays a fixed list of samples, then fails.
pub struct ScriptedSource {
    samples: std::vec::IntoIter<RawSample>,
}

impl ScriptedSource {
    pub fn new(samples: Vec<RawSample>) -> Self {
        Self {
            samples: samples.into_iter(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

impl SensorSource for ScriptedSource {
    fn read(&mut self) -> AcsResult<RawSample> {
        self.samples
            .next()
            .ok_or_else(|| AcsError::SensorFailed("scripted source exhausted".to_string()))
    }
}
