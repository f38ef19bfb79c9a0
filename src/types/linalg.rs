//! Linear algebra type system for the attitude estimator
//!
//! Provides compile-time dimensions and clean type aliases shared by the
//! buffers, filter bank and estimation pipeline.

use nalgebra::{Matrix3, Vector3};

// ===== Buffer Dimensions =====
pub const BUFFER_CAPACITY: usize = 64;

// ===== Sensor Dimensions =====
pub const CSS_CHANNELS: usize = 7; // +x, -x, +y, -y, +z, -z (a), -z (b)
pub const MAX_FILTER_ORDER: usize = 5;

// ===== Precision Split =====
// Field and field rate are differenced, so they keep double precision.
pub type Vec3d = Vector3<f64>;
// Angular velocity, sun vector and kernel weights are single precision.
pub type Vec3f = Vector3<f32>;
pub type Mat3f = Matrix3<f32>;

// ===== Coarse Sun Sensor Channel Indices =====
pub const CSS_POS_X: usize = 0;
pub const CSS_NEG_X: usize = 1;
pub const CSS_POS_Y: usize = 2;
pub const CSS_NEG_Y: usize = 3;
pub const CSS_POS_Z: usize = 4;
pub const CSS_NEG_Z_A: usize = 5;
pub const CSS_NEG_Z_B: usize = 6;

pub type CssLux = [f32; CSS_CHANNELS];
