pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MagSample {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MagSample {
    pub fn as_vector(&self) -> Vec3d {
        Vec3d::new(self.x, self.y, self.z)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CssSample {
    pub timestamp: f64,
    pub lux: CssLux,
}

/// One control cycle's worth of raw sensor input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub mag: MagSample,
    pub css: CssSample,
}

impl RawSample {
    pub fn new(timestamp: f64, field: Vec3d, lux: CssLux) -> Self {
        Self {
            mag: MagSample {
                timestamp,
                x: field.x,
                y: field.y,
                z: field.z,
            },
            css: CssSample { timestamp, lux },
        }
    }

    pub fn timestamp(&self) -> f64 {
        self.mag.timestamp
    }
}
