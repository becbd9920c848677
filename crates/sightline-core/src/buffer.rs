//! Reusable receive buffer for fixed-layout provider records.

use crate::error::{Result, TelemetryError};

/// Default number of records a feed's buffer is sized for on first use.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048;

/// Growable array the provider copies records into.
///
/// Capacity only grows, by at least half its current size each time, so a
/// feed whose record count creeps upward reallocates rarely. Nothing past the
/// last fill's count is meaningful and [`TransferBuffer::records`] never
/// exposes it.
#[derive(Debug)]
pub struct TransferBuffer<T> {
    slots: Vec<T>,
    filled: usize,
    reallocations: usize,
}

impl<T: Copy + Default> Default for TransferBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default> TransferBuffer<T> {
    /// An empty buffer. Storage is allocated on the first `ensure_capacity`.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            filled: 0,
            reallocations: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut buffer = Self::new();
        buffer.ensure_capacity(capacity);
        buffer
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// How many times storage has been replaced.
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    /// Make room for at least `required` records.
    ///
    /// New capacity is `max(required, floor(capacity * 1.5))`. Returns true if
    /// the storage was reallocated.
    pub fn ensure_capacity(&mut self, required: usize) -> bool {
        let current = self.slots.len();
        if required <= current {
            return false;
        }
        let grown = current + current / 2;
        let target = required.max(grown);
        let mut slots = Vec::with_capacity(target);
        slots.extend_from_slice(&self.slots[..self.filled]);
        slots.resize(target, T::default());
        self.slots = slots;
        self.reallocations += 1;
        log::debug!("transfer buffer grown {current} -> {target} records");
        true
    }

    /// Let `copy` write into the whole buffer and record how many slots it
    /// filled. Never reallocates.
    pub fn fill<F>(&mut self, copy: F) -> Result<usize>
    where
        F: FnOnce(&mut [T]) -> Result<usize>,
    {
        self.filled = 0;
        let copied = copy(&mut self.slots)?;
        if copied > self.slots.len() {
            return Err(TelemetryError::DecodeFailure(format!(
                "provider reported {copied} records copied into a buffer of {}",
                self.slots.len()
            )));
        }
        self.filled = copied;
        Ok(copied)
    }

    /// Records written by the last successful fill.
    pub fn records(&self) -> &[T] {
        &self.slots[..self.filled]
    }

    /// Forget the last fill without touching capacity.
    pub fn discard(&mut self) {
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn starts_unallocated() {
        let buf: TransferBuffer<u32> = TransferBuffer::new();
        assert_eq!(buf.capacity(), 0);
        assert!(buf.records().is_empty());
    }

    #[test]
    fn growth_is_one_and_a_half() {
        let mut buf: TransferBuffer<u32> = TransferBuffer::with_capacity(10);
        assert!(buf.ensure_capacity(11));
        assert_eq!(buf.capacity(), 15);
        assert!(buf.ensure_capacity(100));
        assert_eq!(buf.capacity(), 100);
        assert!(!buf.ensure_capacity(60));
        assert_eq!(buf.capacity(), 100);
        assert_eq!(buf.reallocations(), 3);
    }

    #[test]
    fn capacity_never_decreases() {
        let mut rng = rand::rng();
        let mut buf: TransferBuffer<u64> = TransferBuffer::new();
        let mut last = 0;
        for _ in 0..500 {
            let n = rng.random_range(0..5000);
            buf.ensure_capacity(n);
            assert!(buf.capacity() >= last);
            assert!(buf.capacity() >= n);
            last = buf.capacity();
        }
    }

    #[test]
    fn fill_within_capacity_keeps_storage() {
        let mut buf: TransferBuffer<u32> = TransferBuffer::with_capacity(8);
        let before = buf.records().as_ptr();
        let copied = buf
            .fill(|dst| {
                for (i, slot) in dst.iter_mut().take(5).enumerate() {
                    *slot = i as u32 * 10;
                }
                Ok(5)
            })
            .unwrap();
        assert_eq!(copied, 5);
        assert_eq!(buf.records(), &[0, 10, 20, 30, 40]);
        assert_eq!(buf.records().as_ptr(), before);
        assert!(!buf.ensure_capacity(8));
        assert_eq!(buf.reallocations(), 1);
    }

    #[test]
    fn overreported_copy_is_rejected() {
        let mut buf: TransferBuffer<u32> = TransferBuffer::with_capacity(4);
        let err = buf.fill(|_| Ok(9)).unwrap_err();
        assert!(matches!(err, TelemetryError::DecodeFailure(_)));
        assert!(buf.records().is_empty());
    }

    #[test]
    fn failed_fill_leaves_nothing_readable() {
        let mut buf: TransferBuffer<u32> = TransferBuffer::with_capacity(4);
        buf.fill(|_| Ok(3)).unwrap();
        let _ = buf.fill(|_| Err(TelemetryError::TransientRefreshFailure("x".into())));
        assert!(buf.records().is_empty());
    }
}
