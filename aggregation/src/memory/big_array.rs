//! Growable arrays whose every allocation is checked against a [`MemoryBudget`](super::MemoryBudget).
/*
* Copyright 2022-2025 Crown Copyright
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
*     http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*/
use crate::error::{AggregationError, Result};
use datafusion::{error::DataFusionError, execution::memory_pool::MemoryReservation};
use log::{debug, warn};
use std::fmt::{Debug, Formatter};

/// Element types a [`BigArray`] can hold. Unwritten slots read as `Default::default()`.
pub trait ArrayElement: Copy + Default + Debug + Send + Sync + 'static {}

impl ArrayElement for i64 {}
impl ArrayElement for f64 {}
impl ArrayElement for u64 {}

/// A resizable buffer backed by a single contiguous allocation and a memory reservation.
///
/// Growth is all or nothing: the bytes for the new slots are reserved before anything is
/// allocated, so a refused reservation leaves both the array and the budget untouched.
/// Dropping the array (or calling [`BigArray::release`]) returns every reserved byte.
pub struct BigArray<T> {
    name: String,
    values: Vec<T>,
    reservation: MemoryReservation,
    initial_capacity: usize,
}

impl<T: ArrayElement> BigArray<T> {
    pub(crate) fn new(
        name: String,
        reservation: MemoryReservation,
        initial_capacity: usize,
    ) -> Self {
        Self {
            name,
            values: Vec::new(),
            reservation,
            initial_capacity: initial_capacity.max(1),
        }
    }

    /// Number of addressable slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bytes this array currently holds from the budget.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.size()
    }

    /// Grow so that `index` is addressable. Capacity is rounded up to the next power of
    /// two (and never below the initial capacity) to amortise reservations.
    ///
    /// # Errors
    /// [`AggregationError::MemoryLimitExceeded`] if the budget refuses the reservation.
    pub fn ensure_capacity(&mut self, index: usize) -> Result<()> {
        if index < self.values.len() {
            return Ok(());
        }
        let required = index.saturating_add(1);
        let new_len = required
            .checked_next_power_of_two()
            .unwrap_or(required)
            .max(self.initial_capacity);
        let additional_slots = new_len - self.values.len();
        let Some(additional) = additional_slots.checked_mul(size_of::<T>()) else {
            return Err(self.limit_exceeded(
                usize::MAX,
                DataFusionError::ResourcesExhausted(format!(
                    "{additional_slots} slots of {} bytes overflows usize",
                    size_of::<T>()
                )),
            ));
        };
        if let Err(source) = self.reservation.try_grow(additional) {
            return Err(self.limit_exceeded(additional, source));
        }
        self.values.reserve_exact(additional_slots);
        self.values.resize(new_len, T::default());
        debug!(
            "Grew {} to {new_len} slots, {} bytes reserved",
            self.name,
            self.reservation.size()
        );
        Ok(())
    }

    fn limit_exceeded(&self, requested: usize, source: DataFusionError) -> AggregationError {
        warn!("Memory budget refused {requested} bytes for {}", self.name);
        AggregationError::MemoryLimitExceeded {
            consumer: self.name.clone(),
            requested,
            source,
        }
    }

    /// # Panics
    /// If `index` is not below [`BigArray::len`].
    #[must_use]
    pub fn get(&self, index: usize) -> T {
        self.values[index]
    }

    /// # Panics
    /// If `index` is not below [`BigArray::len`].
    pub fn set(&mut self, index: usize, value: T) {
        self.values[index] = value;
    }

    /// Drop every slot at or beyond `len` and give the freed bytes back to the budget.
    /// Does nothing if the array is already that small.
    pub fn shrink_to(&mut self, len: usize) {
        if len >= self.values.len() {
            return;
        }
        let freed = (self.values.len() - len) * size_of::<T>();
        self.values.truncate(len);
        self.values.shrink_to_fit();
        self.reservation.shrink(freed);
        debug!("Compacted {} to {len} slots, released {freed} bytes", self.name);
    }

    /// Release the array and all of its reserved memory.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Debug for BigArray<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigArray")
            .field("name", &self.name)
            .field("len", &self.values.len())
            .field("reserved", &self.reservation.size())
            .finish()
    }
}

const WORD_BITS: usize = u64::BITS as usize;

/// A growable bit set stored in a [`BigArray`] of words.
#[derive(Debug)]
pub struct BitArray {
    words: BigArray<u64>,
}

impl BitArray {
    pub(crate) fn new(words: BigArray<u64>) -> Self {
        Self { words }
    }

    /// Number of addressable bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.words.reserved_bytes()
    }

    /// # Errors
    /// [`AggregationError::MemoryLimitExceeded`] if the budget refuses the reservation.
    pub fn ensure_capacity(&mut self, index: usize) -> Result<()> {
        self.words.ensure_capacity(index / WORD_BITS)
    }

    /// Set bit `index`, growing if needed.
    ///
    /// # Errors
    /// [`AggregationError::MemoryLimitExceeded`] if the budget refuses the reservation.
    pub fn set(&mut self, index: usize) -> Result<()> {
        let word = index / WORD_BITS;
        self.words.ensure_capacity(word)?;
        self.words
            .set(word, self.words.get(word) | (1 << (index % WORD_BITS)));
        Ok(())
    }

    /// Bits beyond the current capacity read as unset.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        let word = index / WORD_BITS;
        word < self.words.len() && (self.words.get(word) >> (index % WORD_BITS)) & 1 == 1
    }

    /// Ascending indices of all set bits.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.words.len()).flat_map(move |word| {
            let bits = self.words.get(word);
            (0..WORD_BITS)
                .filter(move |bit| (bits >> bit) & 1 == 1)
                .map(move |bit| word * WORD_BITS + bit)
        })
    }

    /// Keep room for at least `bits` bits and release the rest. Every bit at or beyond
    /// `bits` is cleared.
    pub fn shrink_to(&mut self, bits: usize) {
        self.words.shrink_to(bits.div_ceil(WORD_BITS));
        let last = bits / WORD_BITS;
        if last < self.words.len() {
            let keep = (1u64 << (bits % WORD_BITS)) - 1;
            self.words.set(last, self.words.get(last) & keep);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{error::AggregationError, memory::MemoryBudget};
    use color_eyre::eyre::Result;
    use test_log::test;

    #[test]
    fn should_start_empty_without_reserving() {
        // Given
        let budget = MemoryBudget::with_limit(1024);

        // When
        let array = budget.new_long_array("test");

        // Then
        assert!(array.is_empty());
        assert_eq!(array.reserved_bytes(), 0);
        assert_eq!(budget.reserved(), 0);
    }

    #[test]
    fn should_grow_to_initial_capacity() -> Result<()> {
        // Given
        let budget = MemoryBudget::with_limit(1024);
        let mut array = budget.new_long_array("test");

        // When
        array.ensure_capacity(0)?;

        // Then
        assert_eq!(array.len(), 16);
        assert_eq!(budget.reserved(), 16 * 8);
        Ok(())
    }

    #[test]
    fn should_grow_to_next_power_of_two() -> Result<()> {
        // Given
        let budget = MemoryBudget::unbounded();
        let mut array = budget.new_double_array("test");

        // When
        array.ensure_capacity(100)?;

        // Then
        assert_eq!(array.len(), 128);
        assert_eq!(array.reserved_bytes(), 128 * 8);
        assert_eq!(budget.reserved(), 128 * 8);
        Ok(())
    }

    #[test]
    fn should_not_grow_when_index_already_addressable() -> Result<()> {
        // Given
        let budget = MemoryBudget::unbounded();
        let mut array = budget.new_long_array("test");
        array.ensure_capacity(20)?;

        // When
        array.ensure_capacity(31)?;

        // Then
        assert_eq!(array.len(), 32);
        assert_eq!(budget.reserved(), 32 * 8);
        Ok(())
    }

    #[test]
    fn should_read_default_from_unwritten_slots() -> Result<()> {
        // Given
        let budget = MemoryBudget::unbounded();
        let mut array = budget.new_long_array("test");

        // When
        array.ensure_capacity(3)?;
        array.set(2, 42);

        // Then
        assert_eq!(
            (0..4).map(|i| array.get(i)).collect::<Vec<_>>(),
            vec![0, 0, 42, 0]
        );
        Ok(())
    }

    #[test]
    fn should_keep_values_when_growing() -> Result<()> {
        // Given
        let budget = MemoryBudget::unbounded();
        let mut array = budget.new_long_array("test");
        array.ensure_capacity(0)?;
        array.set(0, 7);

        // When
        array.ensure_capacity(1000)?;

        // Then
        assert_eq!(array.get(0), 7);
        assert_eq!(array.get(1000), 0);
        Ok(())
    }

    #[test]
    fn should_fail_growth_atomically_when_over_budget() -> Result<()> {
        // Given
        let budget = MemoryBudget::with_limit(200);
        let mut array = budget.new_long_array("test");
        array.ensure_capacity(15)?;
        array.set(15, 99);

        // When
        let result = array.ensure_capacity(16);

        // Then
        assert!(matches!(
            result,
            Err(AggregationError::MemoryLimitExceeded { requested: 128, .. })
        ));
        assert_eq!(array.len(), 16);
        assert_eq!(array.get(15), 99);
        assert_eq!(budget.reserved(), 128);
        Ok(())
    }

    #[test]
    fn should_release_memory_on_release() -> Result<()> {
        // Given
        let budget = MemoryBudget::with_limit(1024);
        let mut array = budget.new_long_array("test");
        array.ensure_capacity(20)?;

        // When
        array.release();

        // Then
        assert_eq!(budget.reserved(), 0);
        Ok(())
    }

    #[test]
    fn should_return_bytes_when_shrinking() -> Result<()> {
        // Given
        let budget = MemoryBudget::unbounded();
        let mut array = budget.new_long_array("test");
        array.ensure_capacity(63)?;
        array.set(3, 5);

        // When
        array.shrink_to(4);

        // Then
        assert_eq!(array.len(), 4);
        assert_eq!(array.get(3), 5);
        assert_eq!(budget.reserved(), 4 * 8);
        Ok(())
    }

    #[test]
    fn should_ignore_shrink_to_larger_size() -> Result<()> {
        // Given
        let budget = MemoryBudget::unbounded();
        let mut array = budget.new_long_array("test");
        array.ensure_capacity(3)?;

        // When
        array.shrink_to(100);

        // Then
        assert_eq!(array.len(), 16);
        assert_eq!(budget.reserved(), 16 * 8);
        Ok(())
    }

    #[test]
    fn should_set_and_read_bits() -> Result<()> {
        // Given
        let budget = MemoryBudget::unbounded();
        let mut bits = budget.new_bit_array("test");

        // When
        bits.set(3)?;
        bits.set(64)?;
        bits.set(1500)?;

        // Then
        assert!(bits.get(3));
        assert!(bits.get(64));
        assert!(bits.get(1500));
        assert!(!bits.get(4));
        assert!(!bits.get(1_000_000));
        assert_eq!(bits.ones().collect::<Vec<_>>(), vec![3, 64, 1500]);
        Ok(())
    }

    #[test]
    fn should_report_no_bits_when_empty() {
        let budget = MemoryBudget::unbounded();
        let bits = budget.new_bit_array("test");
        assert!(bits.is_empty());
        assert_eq!(bits.ones().count(), 0);
    }

    #[test]
    fn should_shrink_bits() -> Result<()> {
        // Given
        let budget = MemoryBudget::unbounded();
        let mut bits = budget.new_bit_array("test");
        bits.set(2)?;
        bits.set(12)?;
        bits.set(2000)?;

        // When
        bits.shrink_to(10);

        // Then
        assert_eq!(bits.len(), 64);
        assert_eq!(bits.ones().collect::<Vec<_>>(), vec![2]);
        assert!(!bits.get(12));
        assert_eq!(budget.reserved(), 8);
        Ok(())
    }
}
