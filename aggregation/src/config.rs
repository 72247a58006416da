//! Configuration for a query's aggregation stages.
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
use crate::{
    error::{AggregationError, Result},
    memory::{DEFAULT_INITIAL_ARRAY_CAPACITY, MemoryBudget},
};
use std::fmt::{Display, Formatter};

/// Settings fixed at query start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationConfig {
    /// Maximum bytes of aggregation state, `None` for no limit
    memory_limit: Option<usize>,
    /// Slots a growable array allocates on first growth
    initial_array_capacity: usize,
}

impl AggregationConfig {
    #[must_use]
    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    #[must_use]
    pub fn initial_array_capacity(&self) -> usize {
        self.initial_array_capacity
    }

    /// Create the memory budget every aggregator in the query will share.
    #[must_use]
    pub fn memory_budget(&self) -> MemoryBudget {
        match self.memory_limit {
            Some(limit) => MemoryBudget::with_limit(limit),
            None => MemoryBudget::unbounded(),
        }
        .with_initial_array_capacity(self.initial_array_capacity)
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            initial_array_capacity: DEFAULT_INITIAL_ARRAY_CAPACITY,
        }
    }
}

impl Display for AggregationConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.memory_limit {
            Some(limit) => write!(f, "memory limit {limit} bytes, ")?,
            None => write!(f, "no memory limit, ")?,
        }
        write!(
            f,
            "initial array capacity {}",
            self.initial_array_capacity
        )
    }
}

/// Builder for `AggregationConfig`.
#[derive(Debug, Default)]
pub struct AggregationConfigBuilder {
    config: AggregationConfig,
}

impl AggregationConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn memory_limit(mut self, memory_limit: Option<usize>) -> Self {
        self.config.memory_limit = memory_limit;
        self
    }

    #[must_use]
    pub fn initial_array_capacity(mut self, initial_array_capacity: usize) -> Self {
        self.config.initial_array_capacity = initial_array_capacity;
        self
    }

    /// Build the `AggregationConfig`, consuming the builder.
    ///
    /// # Errors
    /// The initial array capacity must be a non-zero power of two.
    pub fn build(self) -> Result<AggregationConfig> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> Result<()> {
        let capacity = self.config.initial_array_capacity;
        if !capacity.is_power_of_two() {
            return Err(AggregationError::InvalidConfig(format!(
                "initial array capacity must be a non-zero power of two, found {capacity}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::AggregationConfigBuilder;
    use color_eyre::eyre::Result;
    use test_log::test;

    macro_rules! assert_error {
        ($err_expr: expr, $err_contents: expr) => {
            assert_eq!(
                $err_expr.err().map(|e| e.to_string()),
                Some($err_contents.to_string())
            )
        };
    }

    #[test]
    fn should_build_defaults() -> Result<()> {
        // When
        let config = AggregationConfigBuilder::new().build()?;

        // Then
        assert_eq!(config.memory_limit(), None);
        assert_eq!(config.initial_array_capacity(), 16);
        assert_eq!(
            config.to_string(),
            "no memory limit, initial array capacity 16"
        );
        Ok(())
    }

    #[test]
    fn should_create_limited_budget() -> Result<()> {
        // Given
        let config = AggregationConfigBuilder::new()
            .memory_limit(Some(4096))
            .initial_array_capacity(4)
            .build()?;

        // When
        let budget = config.memory_budget();
        let mut array = budget.new_long_array("test");
        array.ensure_capacity(0)?;

        // Then
        assert_eq!(budget.limit(), Some(4096));
        assert_eq!(array.len(), 4);
        assert_eq!(
            config.to_string(),
            "memory limit 4096 bytes, initial array capacity 4"
        );
        Ok(())
    }

    #[test]
    fn should_fail_with_zero_initial_capacity() {
        assert_error!(
            AggregationConfigBuilder::new()
                .initial_array_capacity(0)
                .build(),
            "invalid aggregation configuration: initial array capacity must be a non-zero power of two, found 0"
        );
    }

    #[test]
    fn should_fail_with_non_power_of_two_initial_capacity() {
        assert_error!(
            AggregationConfigBuilder::new()
                .initial_array_capacity(12)
                .build(),
            "invalid aggregation configuration: initial array capacity must be a non-zero power of two, found 12"
        );
    }
}
