use nalgebra::Vector3;

use crate::fast_math::AcsFloat;
use crate::types::BUFFER_CAPACITY;

/// Fixed-capacity circular history of 3-vectors.
///
/// The cursor always names the most recently written slot. Until the buffer
/// is full only `0..=cursor` holds data; after it every slot does.
#[derive(Clone, Debug)]
pub struct RingBuffer<T: AcsFloat, const N: usize = BUFFER_CAPACITY> {
    slots: [Vector3<T>; N],
    cursor: Option<usize>,
    full: bool,
}

pub type FieldBuffer = RingBuffer<f64>;
pub type FieldRateBuffer = RingBuffer<f64>;
pub type OmegaBuffer = RingBuffer<f32>;
pub type SunBuffer = RingBuffer<f32>;

impl<T: AcsFloat, const N: usize> RingBuffer<T, N> {
    pub fn new() -> Self {
        Self {
            slots: [Vector3::zeros(); N],
            cursor: None,
            full: false,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Move the cursor to the next slot and return it. Latches `full` once
    /// the cursor lands on `N - 1`, the last slot before the wrap, so the
    /// flag is set exactly when all `N` slots have been written.
    pub fn advance(&mut self) -> usize {
        let next = self.cursor.map_or(0, |c| (c + 1) % N);
        if next == N - 1 {
            self.full = true;
        }
        self.cursor = Some(next);
        next
    }

    /// Index `k` samples before `cursor`, wrapping through `N`.
    pub const fn previous_index(cursor: usize, k: usize) -> usize {
        (cursor % N + N - k % N) % N
    }

    pub fn clear(&mut self, index: usize) {
        self.slots[index % N] = Vector3::zeros();
    }

    /// Advance, clear the new slot, then store `value` in it.
    pub fn push(&mut self, value: Vector3<T>) -> usize {
        let index = self.advance();
        self.clear(index);
        self.slots[index] = value;
        index
    }

    pub fn get(&self, index: usize) -> Vector3<T> {
        self.slots[index % N]
    }

    pub fn set(&mut self, index: usize, value: Vector3<T>) {
        self.slots[index % N] = value;
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Number of slots holding written data.
    pub fn len(&self) -> usize {
        if self.full {
            N
        } else {
            self.cursor.map_or(0, |c| c + 1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<Vector3<T>> {
        self.cursor.map(|c| self.slots[c])
    }

    /// Value written `k` cycles before the latest one, if it exists.
    pub fn lookback(&self, k: usize) -> Option<Vector3<T>> {
        let cursor = self.cursor?;
        if k >= self.len() {
            return None;
        }
        Some(self.slots[Self::previous_index(cursor, k)])
    }

    /// Zero every slot and return to the unprimed cursor. The full flag is
    /// left as it was.
    pub fn flush(&mut self) {
        self.slots = [Vector3::zeros(); N];
        self.cursor = None;
    }

    /// Back to the freshly allocated state, full flag included.
    pub fn reset(&mut self) {
        self.flush();
        self.full = false;
    }

    /// Mean over all `N` slots, written or not.
    pub fn average(&self) -> Vector3<T> {
        let sum = self
            .slots
            .iter()
            .fold(Vector3::zeros(), |acc: Vector3<T>, v| acc + v);
        sum / T::from_weight(N as f32)
    }
}

impl<T: AcsFloat, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
