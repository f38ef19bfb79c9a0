//! Mode flags and the process-wide inertia constants.

use serde::{Deserialize, Serialize};

use crate::error::{AcsError, AcsResult};
use crate::fast_math::mat_vec_mul;
use crate::types::{Mat3f, Vec3f};

/// ACS mode. Only `Detumble` is assumed here; the others are assigned by
/// a higher-level controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcsMode {
    #[default]
    Detumble,
    SunPointing,
    Ready,
}

impl AcsMode {
    pub fn as_u8(self) -> u8 {
        match self {
            AcsMode::Detumble => 0,
            AcsMode::SunPointing => 1,
            AcsMode::Ready => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AcsMode::Detumble),
            1 => Some(AcsMode::SunPointing),
            2 => Some(AcsMode::Ready),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeState {
    mode: AcsMode,
    night: bool,
    first_detumble: bool,
}

impl ModeState {
    pub fn new() -> Self {
        Self {
            mode: AcsMode::Detumble,
            night: false,
            first_detumble: true,
        }
    }

    /// Night is recomputed every cycle from the latest illumination and
    /// held until the next one. No debounce.
    pub fn latch_night(&mut self, night: bool) {
        if night != self.night {
            log::info!("[ACS] Night flag {} -> {}", self.night, night);
        }
        self.night = night;
    }

    pub fn night(&self) -> bool {
        self.night
    }

    pub fn first_detumble(&self) -> bool {
        self.first_detumble
    }

    /// Called by the external controller once the first detumble is done.
    pub fn clear_first_detumble(&mut self) {
        self.first_detumble = false;
    }

    pub fn mode(&self) -> AcsMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: AcsMode) {
        self.mode = mode;
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Satellite moment of inertia (kg m²) and its inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InertiaTensor {
    moi: Mat3f,
    inverse: Mat3f,
}

impl InertiaTensor {
    pub fn new(moi: Mat3f) -> AcsResult<Self> {
        let inverse = moi.try_inverse().ok_or_else(|| {
            AcsError::InvalidConfig("Inertia tensor is singular".to_string())
        })?;
        Ok(Self { moi, inverse })
    }

    pub fn from_rows(rows: [[f32; 3]; 3]) -> AcsResult<Self> {
        Self::new(Mat3f::from_fn(|r, c| rows[r][c]))
    }

    pub fn moi(&self) -> &Mat3f {
        &self.moi
    }

    pub fn inverse(&self) -> &Mat3f {
        &self.inverse
    }

    pub fn momentum(&self, omega: &Vec3f) -> Vec3f {
        mat_vec_mul(&self.moi, omega)
    }

    pub fn angular_velocity(&self, momentum: &Vec3f) -> Vec3f {
        mat_vec_mul(&self.inverse, momentum)
    }
}

pub const REFERENCE_MOI: [[f32; 3]; 3] = [
    [0.0821, 0.0, 0.0],
    [0.0, 0.0752, 0.0],
    [0.0, 0.0, 0.0874],
];

impl Default for InertiaTensor {
    fn default() -> Self {
        let diagonal = Vec3f::new(REFERENCE_MOI[0][0], REFERENCE_MOI[1][1], REFERENCE_MOI[2][2]);
        Self {
            moi: Mat3f::from_diagonal(&diagonal),
            inverse: Mat3f::from_diagonal(&diagonal.map(|d| 1.0 / d)),
        }
    }
}

/// Detumble targets, derived once at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Targets {
    pub omega: Vec3f,
    pub momentum: Vec3f,
}

impl Targets {
    pub fn new(inertia: &InertiaTensor, omega: Vec3f) -> Self {
        Self {
            omega,
            momentum: inertia.momentum(&omega),
        }
    }
}
