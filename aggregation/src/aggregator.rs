//! Aggregators bind a function instance to an [`AggregatorMode`].
//!
//! The mode is fixed at construction and decides two things: whether each batch is fed
//! to the function as raw values or as partial state, and whether evaluation emits
//! partial state or the final result.
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
    function::{
        AggregationFunctionKind, AggregatorFunction, AggregatorFunctionSupplier,
        GroupingAggregatorFunction,
    },
    mode::AggregatorMode,
};
use arrow::{array::ArrayRef, datatypes::Field, record_batch::RecordBatch};
use std::fmt::{Display, Formatter};

/// Output field of a function of `kind` evaluated in `mode`. Partial state is a struct
/// column, the final result a primitive one, both named after the family.
fn output_field(kind: AggregationFunctionKind, mode: AggregatorMode) -> Field {
    let data_type = if mode.is_output_partial() {
        kind.intermediate_type()
    } else {
        kind.final_type()
    };
    Field::new(kind.name(), data_type, true)
}

/// Builds [`Aggregator`]s of one function family in one mode.
#[derive(Debug, Clone)]
pub struct AggregatorFactory {
    supplier: AggregatorFunctionSupplier,
    mode: AggregatorMode,
}

impl AggregatorFactory {
    pub(crate) fn new(supplier: AggregatorFunctionSupplier, mode: AggregatorMode) -> Self {
        Self { supplier, mode }
    }

    #[must_use]
    pub fn mode(&self) -> AggregatorMode {
        self.mode
    }

    #[must_use]
    pub fn get(&self) -> Aggregator {
        Aggregator::new(self.supplier.aggregator(), self.mode)
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.supplier.describe()
    }
}

/// An ungrouped function together with the mode it runs in.
#[derive(Debug, Clone)]
pub struct Aggregator {
    function: AggregatorFunction,
    mode: AggregatorMode,
}

impl Aggregator {
    #[must_use]
    pub fn new(function: AggregatorFunction, mode: AggregatorMode) -> Self {
        Self { function, mode }
    }

    #[must_use]
    pub fn mode(&self) -> AggregatorMode {
        self.mode
    }

    #[must_use]
    pub fn function(&self) -> &AggregatorFunction {
        &self.function
    }

    /// Feed one batch to the function as raw values or as partial state, per the mode.
    ///
    /// # Errors
    /// The batch columns on the function's channels must match what the mode reads.
    pub fn process_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        if self.mode.is_input_partial() {
            self.function.add_intermediate_input(batch)
        } else {
            self.function.add_raw_input(batch)
        }
    }

    /// Columns this aggregator contributes to an output batch. Always one, since
    /// partial state is packed into a single struct column.
    #[must_use]
    pub fn evaluate_block_count(&self) -> usize {
        1
    }

    #[must_use]
    pub fn output_field(&self) -> Field {
        output_field(self.function.kind(), self.mode)
    }

    /// Single-row partial state or final result, per the mode.
    ///
    /// # Errors
    /// If partial state cannot be packed into its struct column.
    pub fn evaluate(&self) -> Result<ArrayRef> {
        if self.mode.is_output_partial() {
            self.function.evaluate_intermediate()
        } else {
            Ok(self.function.evaluate_final())
        }
    }
}

impl Display for Aggregator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Aggregator[aggregatorFunction={}, mode={}]",
            self.function, self.mode
        )
    }
}

/// Builds [`GroupingAggregator`]s of one function family in one mode.
#[derive(Debug, Clone)]
pub struct GroupingAggregatorFactory {
    supplier: AggregatorFunctionSupplier,
    mode: AggregatorMode,
}

impl GroupingAggregatorFactory {
    pub(crate) fn new(supplier: AggregatorFunctionSupplier, mode: AggregatorMode) -> Self {
        Self { supplier, mode }
    }

    #[must_use]
    pub fn mode(&self) -> AggregatorMode {
        self.mode
    }

    #[must_use]
    pub fn get(&self) -> GroupingAggregator {
        GroupingAggregator::new(self.supplier.grouping_aggregator(), self.mode)
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.supplier.describe()
    }
}

/// A grouped function together with the mode it runs in.
#[derive(Debug)]
pub struct GroupingAggregator {
    function: GroupingAggregatorFunction,
    mode: AggregatorMode,
}

impl GroupingAggregator {
    #[must_use]
    pub fn new(function: GroupingAggregatorFunction, mode: AggregatorMode) -> Self {
        Self { function, mode }
    }

    #[must_use]
    pub fn mode(&self) -> AggregatorMode {
        self.mode
    }

    #[must_use]
    pub fn function(&self) -> &GroupingAggregatorFunction {
        &self.function
    }

    /// Feed one batch, with one group id per row, per the mode.
    ///
    /// # Errors
    /// The batch columns on the function's channels must match what the mode reads, and
    /// growing the per-group state must fit the memory budget.
    pub fn process_batch(&mut self, group_ids: &[usize], batch: &RecordBatch) -> Result<()> {
        if self.mode.is_input_partial() {
            self.function.add_intermediate_input(group_ids, batch)
        } else {
            self.function.add_raw_input(group_ids, batch)
        }
    }

    /// Fold every group of `other` into this aggregator.
    ///
    /// # Errors
    /// Both aggregators must run the same function family in the same mode.
    pub fn merge_from(&mut self, other: &GroupingAggregator) -> Result<()> {
        if self.mode != other.mode {
            return Err(AggregationError::IncompatibleMerge {
                into: self.to_string(),
                from: other.to_string(),
            });
        }
        self.function.merge_from(&other.function)
    }

    #[must_use]
    pub fn evaluate_block_count(&self) -> usize {
        1
    }

    #[must_use]
    pub fn output_field(&self) -> Field {
        output_field(self.function.kind(), self.mode)
    }

    /// Partial state or final result of the `selected` groups, per the mode.
    ///
    /// # Errors
    /// If partial state cannot be packed into its struct column.
    pub fn evaluate(&self, selected: &[usize]) -> Result<ArrayRef> {
        if self.mode.is_output_partial() {
            self.function.evaluate_intermediate(selected)
        } else {
            Ok(self.function.evaluate_final(selected))
        }
    }

    /// See [`GroupingAggregatorFunction::compact`].
    pub fn compact(&mut self, retained_groups: usize) {
        self.function.compact(retained_groups);
    }

    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.function.reserved_bytes()
    }

    /// Release the function's state and its reserved memory.
    pub fn close(self) {
        self.function.close();
    }
}

impl Display for GroupingAggregator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GroupingAggregator[aggregatorFunction={}, mode={}]",
            self.function, self.mode
        )
    }
}
