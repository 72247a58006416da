//! Accumulator state for the aggregation families, and the fold operations shared by
//! the ungrouped and grouped implementations.
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

/// A Kahan compensated floating point sum. `delta` carries the low order bits lost by
/// the last addition and is folded back in by the next one.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompensatedSum {
    value: f64,
    delta: f64,
}

impl CompensatedSum {
    #[must_use]
    pub fn new(value: f64, delta: f64) -> Self {
        Self { value, delta }
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    #[must_use]
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Best estimate of the true sum.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.value + self.delta
    }

    pub fn add(&mut self, value: f64) {
        self.add_with_delta(value, 0.0);
    }

    /// Add another compensated sum, given as its value and correction term.
    pub fn add_with_delta(&mut self, value: f64, delta: f64) {
        let corrected = value + (self.delta + delta);
        let updated = self.value + corrected;
        if updated.is_finite() {
            self.delta = corrected - (updated - self.value);
        } else {
            // compensation is meaningless once the sum has overflowed
            self.delta = 0.0;
        }
        self.value = updated;
    }
}

/// Running state of an average: a compensated sum and the number of values in it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AvgState {
    sum: CompensatedSum,
    count: i64,
}

impl AvgState {
    #[must_use]
    pub fn new(sum: CompensatedSum, count: i64) -> Self {
        Self { sum, count }
    }

    #[must_use]
    pub fn sum(&self) -> CompensatedSum {
        self.sum
    }

    #[must_use]
    pub fn count(&self) -> i64 {
        self.count
    }

    /// Returns the updated count, or `None` on overflow in which case the state is left
    /// untouched.
    #[allow(clippy::cast_precision_loss)]
    pub fn add(&mut self, value: i64) -> Option<i64> {
        let count = self.count.checked_add(1)?;
        self.sum.add(value as f64);
        self.count = count;
        Some(count)
    }

    /// Fold in another average's partial state. Returns the updated count, or `None` on
    /// overflow in which case the state is left untouched.
    pub fn merge(&mut self, other: &AvgState) -> Option<i64> {
        let count = self.count.checked_add(other.count)?;
        self.sum.add_with_delta(other.sum.value, other.sum.delta);
        self.count = count;
        Some(count)
    }

    /// The average, or `None` if no values were ever added.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum.sum() / self.count as f64)
    }
}

/// Fold operations over 64-bit integers whose partial state is a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongOp {
    Max,
    Min,
    Sum,
}

impl LongOp {
    /// Combine `value` into `acc`, or `None` on overflow.
    #[must_use]
    pub fn op(self, acc: i64, value: i64) -> Option<i64> {
        match self {
            Self::Max => Some(acc.max(value)),
            Self::Min => Some(acc.min(value)),
            Self::Sum => acc.checked_add(value),
        }
    }
}

/// Running state of a max, min or sum. `None` until the first value arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LongState {
    value: Option<i64>,
}

impl LongState {
    #[must_use]
    pub fn value(&self) -> Option<i64> {
        self.value
    }

    /// Fold in `value`. Raw values and partial states combine the same way.
    ///
    /// Returns the updated value, or `None` on overflow in which case the state is
    /// left untouched.
    pub fn add(&mut self, op: LongOp, value: i64) -> Option<i64> {
        let updated = match self.value {
            Some(acc) => op.op(acc, value)?,
            None => value,
        };
        self.value = Some(updated);
        Some(updated)
    }
}
