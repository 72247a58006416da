//! Memory accounting for aggregation state.
//!
//! All per-group state lives in [`BigArray`]s. Each array holds a [`MemoryReservation`]
//! taken from a shared [`MemoryPool`] and must reserve bytes before it is allowed to
//! grow. The pool is shared by every aggregator in a query, possibly across threads.
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
use datafusion::execution::memory_pool::{
    GreedyMemoryPool, MemoryConsumer, MemoryPool, MemoryReservation, UnboundedMemoryPool,
};
use log::debug;
use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

pub mod big_array;

pub use big_array::{ArrayElement, BigArray, BitArray};

/// Default number of slots a growable array allocates the first time it grows.
pub const DEFAULT_INITIAL_ARRAY_CAPACITY: usize = 16;

/// Shared, thread safe memory budget for aggregation state.
///
/// Cloning is cheap and every clone draws from the same pool.
#[derive(Clone)]
pub struct MemoryBudget {
    pool: Arc<dyn MemoryPool>,
    limit: Option<usize>,
    initial_array_capacity: usize,
}

impl MemoryBudget {
    /// A budget capped at `limit` bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        debug!("Creating aggregation memory budget of {limit} bytes");
        Self {
            pool: Arc::new(GreedyMemoryPool::new(limit)),
            limit: Some(limit),
            initial_array_capacity: DEFAULT_INITIAL_ARRAY_CAPACITY,
        }
    }

    /// A budget that tracks reservations but never refuses one.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            pool: Arc::new(UnboundedMemoryPool::default()),
            limit: None,
            initial_array_capacity: DEFAULT_INITIAL_ARRAY_CAPACITY,
        }
    }

    /// Set the number of slots arrays created from this budget allocate on first growth.
    #[must_use]
    pub(crate) fn with_initial_array_capacity(mut self, initial_array_capacity: usize) -> Self {
        self.initial_array_capacity = initial_array_capacity;
        self
    }

    /// Bytes currently reserved by all consumers of this budget.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.pool.reserved()
    }

    /// The byte ceiling, `None` when unbounded.
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Register a new, empty reservation against this budget. The bytes it holds are
    /// returned to the budget when it is dropped.
    #[must_use]
    pub fn reservation(&self, consumer: impl Into<String>) -> MemoryReservation {
        MemoryConsumer::new(consumer).register(&self.pool)
    }

    #[must_use]
    pub fn new_long_array(&self, name: impl Into<String>) -> BigArray<i64> {
        self.new_array(name)
    }

    #[must_use]
    pub fn new_double_array(&self, name: impl Into<String>) -> BigArray<f64> {
        self.new_array(name)
    }

    #[must_use]
    pub fn new_bit_array(&self, name: impl Into<String>) -> BitArray {
        BitArray::new(self.new_array(name))
    }

    fn new_array<T: ArrayElement>(&self, name: impl Into<String>) -> BigArray<T> {
        let name = name.into();
        let reservation = self.reservation(name.clone());
        BigArray::new(name, reservation, self.initial_array_capacity)
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Debug for MemoryBudget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBudget")
            .field("reserved", &self.reserved())
            .field("limit", &self.limit)
            .field("initial_array_capacity", &self.initial_array_capacity)
            .finish()
    }
}
