//! Causal FIR approximation of a low-pass Bessel filter.
//!
//! The kernel is sampled from the normalized Bessel transfer function
//! `H(s) = θ_n(0) / θ_n(s / ω_c)` at integer buffer distances, and applied as
//! a normalized weighted average walking backwards through a ring buffer.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{AcsError, AcsResult};
use crate::fast_math::{is_finite, AcsFloat};
use crate::ring_buffer::RingBuffer;
use crate::types::{BUFFER_CAPACITY, MAX_FILTER_ORDER};

/// Filter design parameters, fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BesselParams {
    pub order: usize,
    /// Cutoff in buffer samples: 5 at a 100 ms loop is a 2 Hz cutoff.
    pub cutoff: f32,
    /// Weights below this end the causal walk.
    pub min_weight: f32,
}

impl Default for BesselParams {
    fn default() -> Self {
        Self {
            order: 3,
            cutoff: 5.0,
            min_weight: 0.001,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BesselKernel {
    weights: [f32; BUFFER_CAPACITY],
    params: BesselParams,
}

impl BesselKernel {
    /// All-zero kernel; `apply` passes samples through unchanged.
    pub fn zeroed(params: BesselParams) -> Self {
        Self {
            weights: [0.0; BUFFER_CAPACITY],
            params,
        }
    }

    /// Kernel that keeps only the current sample.
    pub fn identity() -> Self {
        let mut kernel = Self::zeroed(BesselParams::default());
        kernel.weights[0] = 1.0;
        kernel
    }

    pub fn derive(params: BesselParams) -> AcsResult<Self> {
        let mut kernel = Self::zeroed(params);
        kernel.rederive(params)?;
        Ok(kernel)
    }

    /// Recompute the weights. On failure the previous weights stay in place.
    pub fn rederive(&mut self, params: BesselParams) -> AcsResult<()> {
        if !(params.cutoff.is_finite() && params.cutoff > 0.0) {
            return Err(AcsError::InvalidConfig(format!(
                "Bessel cutoff must be finite and positive, got {}",
                params.cutoff
            )));
        }
        if !(params.min_weight.is_finite() && params.min_weight >= 0.0) {
            return Err(AcsError::InvalidConfig(format!(
                "Bessel minimum weight must be finite and non-negative, got {}",
                params.min_weight
            )));
        }

        let order = if params.order > MAX_FILTER_ORDER {
            log::warn!(
                "[BESSEL] Order {} above maximum, clamped to {}",
                params.order,
                MAX_FILTER_ORDER
            );
            MAX_FILTER_ORDER
        } else {
            params.order
        };

        let coeffs = reverse_bessel_coefficients(order).map_err(|e| {
            log::error!("[BESSEL] Coeff alloc failed, kernel left unchanged");
            e
        })?;

        let cutoff = f64::from(params.cutoff);
        for (j, weight) in self.weights.iter_mut().enumerate() {
            let ratio = j as f64 / cutoff;
            let mut power = 1.0;
            let mut transfer = 0.0;
            for c in &coeffs {
                transfer += c * power;
                power *= ratio;
            }
            *weight = (coeffs[0] / transfer) as f32;
        }
        self.params = BesselParams { order, ..params };

        log::info!(
            "[BESSEL] Derived order {} kernel, cutoff {:.2}, support {} samples",
            order,
            params.cutoff,
            self.support()
        );
        Ok(())
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn params(&self) -> BesselParams {
        self.params
    }

    /// Number of leading weights at or above the truncation threshold.
    pub fn support(&self) -> usize {
        self.weights
            .iter()
            .position(|&w| w < self.params.min_weight)
            .unwrap_or(BUFFER_CAPACITY)
    }

    /// Weighted causal average ending at `index`.
    ///
    /// Walks back one slot at a time, stopping at the first weight under the
    /// threshold, at the oldest written sample, or after `N` samples. Axes
    /// share the walk and are convolved independently. Non-finite history
    /// left by a faulted cycle is skipped; a non-finite current sample still
    /// propagates.
    pub fn apply<T: AcsFloat, const N: usize>(
        &self,
        buffer: &RingBuffer<T, N>,
        index: usize,
    ) -> Vector3<T> {
        let valid = buffer.len().min(N).min(BUFFER_CAPACITY);
        let mut acc = Vector3::<T>::zeros();
        let mut weight_sum = T::zero();

        for k in 0..valid {
            let w = self.weights[k];
            if k > 0 && w < self.params.min_weight {
                break;
            }
            let sample = buffer.get(RingBuffer::<T, N>::previous_index(index, k));
            if k > 0 && !is_finite(&sample) {
                continue;
            }
            let w = T::from_weight(w);
            acc += sample * w;
            weight_sum += w;
        }

        if weight_sum == T::zero() {
            return buffer.get(index);
        }
        acc / weight_sum
    }

    /// Replace the sample at `index` with its filtered value.
    pub fn apply_in_place<T: AcsFloat, const N: usize>(
        &self,
        buffer: &mut RingBuffer<T, N>,
        index: usize,
    ) -> Vector3<T> {
        let filtered = self.apply(buffer, index);
        buffer.set(index, filtered);
        filtered
    }
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, i| acc * i as f64)
}

/// Coefficients `a_i = (2n - i)! / (2^(n-i) i! (n-i)!)` of the reverse Bessel
/// polynomial of order `n`, lowest power first. Orders above
/// `MAX_FILTER_ORDER` are clamped.
pub fn reverse_bessel_coefficients(order: usize) -> AcsResult<Vec<f64>> {
    let order = order.min(MAX_FILTER_ORDER);
    let mut coeffs = Vec::new();
    coeffs
        .try_reserve_exact(order + 1)
        .map_err(|_| AcsError::KernelAllocation)?;
    for i in 0..=order {
        let denom = f64::from(1u32 << (order - i)) * factorial(i) * factorial(order - i);
        coeffs.push(factorial(2 * order - i) / denom);
    }
    Ok(coeffs)
}
