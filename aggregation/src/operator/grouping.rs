//! Grouped aggregation keyed by a caller-assigned group id column.
//!
//! Each input batch carries its group ids on a fixed channel. Ids must be non-null and
//! non-negative; they index straight into the aggregators' per-group state. On finish
//! the operator emits one row per group id it has seen, in ascending id order.
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
use super::check_modes;
use crate::{
    aggregator::{GroupingAggregator, GroupingAggregatorFactory},
    error::{AggregationError, Result},
    memory::{BitArray, MemoryBudget},
    mode::AggregatorMode,
};
use arrow::{
    array::{Array, ArrayRef, AsArray, Int64Array},
    datatypes::{DataType, Field, Int64Type, Schema},
    record_batch::RecordBatch,
};
use log::{debug, warn};
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

/// Name of the group id column in output batches.
pub const GROUP_ID_COLUMN: &str = "group";

/// Builds [`GroupingAggregationOperator`]s over the same group channel and aggregators.
#[derive(Debug, Clone)]
pub struct GroupingAggregationOperatorFactory {
    mode: AggregatorMode,
    group_channel: usize,
    aggregators: Vec<GroupingAggregatorFactory>,
    budget: MemoryBudget,
}

impl GroupingAggregationOperatorFactory {
    /// The operators' seen-group tracking draws from `budget`.
    ///
    /// # Errors
    /// Every aggregator factory must run in `mode`.
    pub fn new(
        mode: AggregatorMode,
        group_channel: usize,
        aggregators: Vec<GroupingAggregatorFactory>,
        budget: MemoryBudget,
    ) -> Result<Self> {
        check_modes(
            mode,
            aggregators.iter().map(GroupingAggregatorFactory::mode),
            |i| aggregators[i].describe(),
        )?;
        Ok(Self {
            mode,
            group_channel,
            aggregators,
            budget,
        })
    }

    #[must_use]
    pub fn mode(&self) -> AggregatorMode {
        self.mode
    }

    #[must_use]
    pub fn get(&self) -> GroupingAggregationOperator {
        GroupingAggregationOperator::new(
            self.group_channel,
            self.aggregators
                .iter()
                .map(GroupingAggregatorFactory::get)
                .collect(),
            &self.budget,
        )
    }

    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "GroupingAggregationOperator[mode = {}, group channel = {}, aggs = {}]",
            self.mode,
            self.group_channel,
            self.aggregators
                .iter()
                .map(GroupingAggregatorFactory::describe)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// Grouped aggregation over a stream of batches.
#[derive(Debug)]
pub struct GroupingAggregationOperator {
    group_channel: usize,
    aggregators: Vec<GroupingAggregator>,
    seen: BitArray,
    finished: bool,
    failure: Option<String>,
    output: Option<RecordBatch>,
}

impl GroupingAggregationOperator {
    #[must_use]
    pub fn new(
        group_channel: usize,
        aggregators: Vec<GroupingAggregator>,
        budget: &MemoryBudget,
    ) -> Self {
        Self {
            group_channel,
            aggregators,
            seen: budget.new_bit_array("GroupingAggregationOperator.seen"),
            finished: false,
            failure: None,
            output: None,
        }
    }

    #[must_use]
    pub fn aggregators(&self) -> &[GroupingAggregator] {
        &self.aggregators
    }

    #[must_use]
    pub fn needs_input(&self) -> bool {
        !self.finished && self.failure.is_none()
    }

    fn check_usable(&self) -> Result<()> {
        if self.finished {
            return Err(AggregationError::OperatorFinished);
        }
        match &self.failure {
            Some(cause) => Err(AggregationError::OperatorFailed(cause.clone())),
            None => Ok(()),
        }
    }

    /// Record a failure that left the aggregators disagreeing on the rows they hold.
    fn fail_on<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("{self} failed: {e}");
            self.failure = Some(e.to_string());
        }
        result
    }

    /// Bytes held from the memory budget by this operator and its aggregators.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.seen.reserved_bytes()
            + self
                .aggregators
                .iter()
                .map(GroupingAggregator::reserved_bytes)
                .sum::<usize>()
    }

    /// Group ids of every row of `batch`.
    fn group_ids(&self, batch: &RecordBatch) -> Result<Vec<usize>> {
        let column = batch.columns().get(self.group_channel).ok_or(
            AggregationError::ChannelOutOfBounds {
                channel: self.group_channel,
                columns: batch.num_columns(),
            },
        )?;
        let ids = column
            .as_primitive_opt::<Int64Type>()
            .ok_or_else(|| AggregationError::InvalidGroupId {
                row: 0,
                reason: format!("group ids must be Int64, found {}", column.data_type()),
            })?;
        ids.iter()
            .enumerate()
            .map(|(row, id)| match id {
                None => Err(AggregationError::InvalidGroupId {
                    row,
                    reason: "group id is null".into(),
                }),
                Some(id) => usize::try_from(id).map_err(|_| AggregationError::InvalidGroupId {
                    row,
                    reason: format!("group id {id} is negative"),
                }),
            })
            .collect()
    }

    /// Feed `batch` to every aggregator, routing each row to the group on the group
    /// channel. Invalid group ids are rejected before any state changes. A failure after
    /// that, such as a refused memory reservation, leaves earlier aggregators holding rows
    /// later ones lack, so the operator then refuses any further work.
    ///
    /// # Errors
    /// [`AggregationError::OperatorFinished`] once finished, and
    /// [`AggregationError::OperatorFailed`] after an earlier failure. Every group id must
    /// be a non-null, non-negative `Int64`. Growing state must fit the memory budget.
    pub fn add_input(&mut self, batch: &RecordBatch) -> Result<()> {
        self.check_usable()?;
        let group_ids = self.group_ids(batch)?;
        let result = self.fold(&group_ids, batch);
        self.fail_on(result)
    }

    fn fold(&mut self, group_ids: &[usize], batch: &RecordBatch) -> Result<()> {
        for aggregator in &mut self.aggregators {
            aggregator.process_batch(group_ids, batch)?;
        }
        group_ids.iter().try_for_each(|&id| self.seen.set(id))
    }

    /// Fold the state of another operator over the same aggregators into this one.
    /// Groups are matched by id, so the output order does not depend on which operator
    /// saw a group first. `other` is only borrowed and must still be closed by its owner.
    ///
    /// # Errors
    /// Neither operator may have finished or failed, and both must run the same
    /// aggregators in the same mode. A failure part way through the merge leaves this
    /// operator refusing further work.
    pub fn merge_from(&mut self, other: &GroupingAggregationOperator) -> Result<()> {
        self.check_usable()?;
        other.check_usable()?;
        if self.aggregators.len() != other.aggregators.len() {
            return Err(AggregationError::IncompatibleMerge {
                into: self.to_string(),
                from: other.to_string(),
            });
        }
        let result = self
            .aggregators
            .iter_mut()
            .zip(&other.aggregators)
            .try_for_each(|(aggregator, from)| aggregator.merge_from(from))
            .and_then(|()| other.seen.ones().try_for_each(|id| self.seen.set(id)));
        self.fail_on(result)
    }

    /// Signal end of input and evaluate every aggregator once over the seen groups.
    /// Further calls do nothing.
    ///
    /// # Errors
    /// [`AggregationError::OperatorFailed`] after an earlier failure, or if the output
    /// batch cannot be assembled.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.check_usable()?;
        let selected = self.seen.ones().collect::<Vec<_>>();
        #[allow(clippy::cast_possible_wrap)]
        let ids = Int64Array::from_iter_values(selected.iter().map(|&id| id as i64));
        let fields = std::iter::once(Field::new(GROUP_ID_COLUMN, DataType::Int64, false))
            .chain(self.aggregators.iter().map(GroupingAggregator::output_field))
            .collect::<Vec<_>>();
        let columns = std::iter::once(Ok(Arc::new(ids) as ArrayRef))
            .chain(
                self.aggregators
                    .iter()
                    .map(|aggregator| aggregator.evaluate(&selected)),
            )
            .collect::<Result<Vec<_>>>()?;
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        debug!("{self} finished with {} groups", batch.num_rows());
        self.output = Some(batch);
        self.finished = true;
        Ok(())
    }

    /// True once finished and the output has been taken.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished && self.output.is_none()
    }

    /// The grouped result batch. `Some` exactly once after finishing.
    pub fn get_output(&mut self) -> Option<RecordBatch> {
        self.output.take()
    }

    /// Release every aggregator and the seen-group tracking, returning their memory to
    /// the budget.
    pub fn close(self) {
        debug!("Closing {self}, releasing {} bytes", self.reserved_bytes());
        for aggregator in self.aggregators {
            aggregator.close();
        }
    }
}

impl Display for GroupingAggregationOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GroupingAggregationOperator[groupChannel={}, aggregators=[{}]]",
            self.group_channel,
            self.aggregators
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
