//! Small 3-vector algebra and an approximate inverse square root.
//!
//! Every operation returns a fresh value, so a destination can never alias
//! the inputs of `cross` or `mat_vec_mul`.

use nalgebra::{Matrix3, RealField, Vector3};
use serde::{Deserialize, Serialize};

/// Which inverse-square-root implementation the estimator runs on.
///
/// Both satisfy the same contract (relative error below 1e-5 for finite
/// positive input); `Fast` avoids the library square root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvSqrtMode {
    #[default]
    Fast,
    Exact,
}

const MAGIC_F32: u32 = 0x5f37_5a86;
const MAGIC_F64: u64 = 0x5fe6_eb50_c7b5_37a9;
const NEWTON_ROUNDS: usize = 3;

/// Bit-level initial guess refined by three Newton-Raphson rounds.
/// Falls back to the exact form outside finite positive input so that
/// 0 maps to +inf and negatives to NaN in both modes.
pub fn fast_inv_sqrt_f32(x: f32) -> f32 {
    if !(x.is_finite() && x > 0.0) {
        return 1.0 / x.sqrt();
    }
    let half = x * 0.5;
    let mut y = f32::from_bits(MAGIC_F32.wrapping_sub(x.to_bits() >> 1));
    for _ in 0..NEWTON_ROUNDS {
        y *= 1.5 - half * y * y;
    }
    y
}

pub fn fast_inv_sqrt_f64(x: f64) -> f64 {
    if !(x.is_finite() && x > 0.0) {
        return 1.0 / x.sqrt();
    }
    let half = x * 0.5;
    let mut y = f64::from_bits(MAGIC_F64.wrapping_sub(x.to_bits() >> 1));
    for _ in 0..NEWTON_ROUNDS {
        y *= 1.5 - half * y * y;
    }
    y
}

/// Scalar types the estimator stores in its buffers (f32 and f64).
pub trait AcsFloat: RealField + Copy {
    fn inv_sqrt(self, mode: InvSqrtMode) -> Self;
    /// Widen a single-precision kernel weight.
    fn from_weight(w: f32) -> Self;
    fn to_wire(self) -> f32;
    fn finite(self) -> bool;
}

impl AcsFloat for f32 {
    fn inv_sqrt(self, mode: InvSqrtMode) -> Self {
        match mode {
            InvSqrtMode::Fast => fast_inv_sqrt_f32(self),
            InvSqrtMode::Exact => 1.0 / self.sqrt(),
        }
    }

    fn from_weight(w: f32) -> Self {
        w
    }

    fn to_wire(self) -> f32 {
        self
    }

    fn finite(self) -> bool {
        self.is_finite()
    }
}

impl AcsFloat for f64 {
    fn inv_sqrt(self, mode: InvSqrtMode) -> Self {
        match mode {
            InvSqrtMode::Fast => fast_inv_sqrt_f64(self),
            InvSqrtMode::Exact => 1.0 / self.sqrt(),
        }
    }

    fn from_weight(w: f32) -> Self {
        f64::from(w)
    }

    fn to_wire(self) -> f32 {
        self as f32
    }

    fn finite(self) -> bool {
        self.is_finite()
    }
}

pub fn cross<T: AcsFloat>(a: &Vector3<T>, b: &Vector3<T>) -> Vector3<T> {
    Vector3::new(
        a.y * b.z - a.z * b.y,
        a.z * b.x - a.x * b.z,
        a.x * b.y - a.y * b.x,
    )
}

pub fn dot<T: AcsFloat>(a: &Vector3<T>, b: &Vector3<T>) -> T {
    a.x * b.x + a.y * b.y + a.z * b.z
}

pub fn norm2<T: AcsFloat>(a: &Vector3<T>) -> T {
    dot(a, a)
}

pub fn norm<T: AcsFloat>(a: &Vector3<T>) -> T {
    norm2(a).sqrt()
}

/// Inverse norm. Not defined for the null vector; callers guard.
pub fn inv_norm<T: AcsFloat>(a: &Vector3<T>, mode: InvSqrtMode) -> T {
    norm2(a).inv_sqrt(mode)
}

/// Unit vector along `a`, or the null vector when the inverse norm is
/// zero or non-finite.
pub fn normalize<T: AcsFloat>(a: &Vector3<T>, mode: InvSqrtMode) -> Vector3<T> {
    let inv = inv_norm(a, mode);
    if !inv.finite() || inv == T::zero() {
        return Vector3::zeros();
    }
    a * inv
}

pub fn mat_vec_mul<T: AcsFloat>(m: &Matrix3<T>, v: &Vector3<T>) -> Vector3<T> {
    Vector3::new(
        m[(0, 0)] * v.x + m[(0, 1)] * v.y + m[(0, 2)] * v.z,
        m[(1, 0)] * v.x + m[(1, 1)] * v.y + m[(1, 2)] * v.z,
        m[(2, 0)] * v.x + m[(2, 1)] * v.y + m[(2, 2)] * v.z,
    )
}

pub fn is_finite<T: AcsFloat>(v: &Vector3<T>) -> bool {
    v.iter().all(|c| c.finite())
}
