//! Aggregation functions keeping one accumulator per group id.
//!
//! State lives in [`BigArray`]s indexed directly by group id, so ids may arrive in any
//! order and with gaps. Slots that were never written read as the function's identity.
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
use super::{
    AggregationFunctionKind, PARTIAL_STATE, RAW_VALUES,
    accumulate::{accumulate, check_group_count, for_each_valid},
    check_channels, pack_state, partial_state,
    state::{AvgState, CompensatedSum, LongOp},
    state_values, typed_column,
    ungrouped::overflow,
};
use crate::{
    error::{AggregationError, Result},
    memory::{BigArray, BitArray, MemoryBudget},
};
use arrow::{
    array::{Array, ArrayRef, Float64Array, Int64Array, StructArray},
    datatypes::{Float64Type, Int64Type},
    record_batch::RecordBatch,
};
use log::debug;
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

/// Per-group compensated sums and counts.
#[derive(Debug)]
struct AvgGroupingState {
    sums: BigArray<f64>,
    deltas: BigArray<f64>,
    counts: BigArray<i64>,
}

impl AvgGroupingState {
    fn new(name: &str, budget: &MemoryBudget) -> Self {
        Self {
            sums: budget.new_double_array(format!("{name}.sums")),
            deltas: budget.new_double_array(format!("{name}.deltas")),
            counts: budget.new_long_array(format!("{name}.counts")),
        }
    }

    fn len(&self) -> usize {
        self.sums
            .len()
            .min(self.deltas.len())
            .min(self.counts.len())
    }

    /// Grow all three arrays or none of them.
    fn ensure_capacity(&mut self, group: usize) -> Result<()> {
        let (sums, deltas) = (self.sums.len(), self.deltas.len());
        self.sums.ensure_capacity(group)?;
        self.deltas
            .ensure_capacity(group)
            .and_then(|()| self.counts.ensure_capacity(group))
            .inspect_err(|_| {
                self.sums.shrink_to(sums);
                self.deltas.shrink_to(deltas);
            })
    }

    fn get(&self, group: usize) -> AvgState {
        if group < self.len() {
            AvgState::new(
                CompensatedSum::new(self.sums.get(group), self.deltas.get(group)),
                self.counts.get(group),
            )
        } else {
            AvgState::default()
        }
    }

    fn put(&mut self, group: usize, state: &AvgState) {
        self.sums.set(group, state.sum().value());
        self.deltas.set(group, state.sum().delta());
        self.counts.set(group, state.count());
    }

    fn add(&mut self, name: &str, group: usize, value: i64) -> Result<()> {
        self.ensure_capacity(group)?;
        let mut state = self.get(group);
        state.add(value).ok_or_else(|| overflow(name))?;
        self.put(group, &state);
        Ok(())
    }

    fn merge(&mut self, name: &str, group: usize, other: &AvgState) -> Result<()> {
        self.ensure_capacity(group)?;
        let mut state = self.get(group);
        state.merge(other).ok_or_else(|| overflow(name))?;
        self.put(group, &state);
        Ok(())
    }

    fn merge_from(&mut self, name: &str, other: &AvgGroupingState) -> Result<()> {
        (0..other.len())
            .map(|group| (group, other.get(group)))
            .filter(|(_, state)| state.count() > 0)
            .try_for_each(|(group, state)| self.merge(name, group, &state))
    }

    fn add_intermediate_input(
        &mut self,
        name: &str,
        group_ids: &[usize],
        partial: &StructArray,
        channel: usize,
    ) -> Result<()> {
        let sums = state_values::<Float64Type>(name, partial, 0, channel)?;
        let deltas = state_values::<Float64Type>(name, partial, 1, channel)?;
        let counts = state_values::<Int64Type>(name, partial, 2, channel)?;
        check_group_count(group_ids, counts.len())?;
        for_each_valid(&counts, |row, count| {
            if sums.is_valid(row) && deltas.is_valid(row) {
                self.merge(
                    name,
                    group_ids[row],
                    &AvgState::new(
                        CompensatedSum::new(sums.value(row), deltas.value(row)),
                        count,
                    ),
                )
            } else {
                Ok(())
            }
        })
    }

    fn evaluate_intermediate(&self, selected: &[usize]) -> Vec<ArrayRef> {
        let states = selected.iter().map(|&g| self.get(g)).collect::<Vec<_>>();
        vec![
            Arc::new(Float64Array::from_iter_values(
                states.iter().map(|s| s.sum().value()),
            )) as ArrayRef,
            Arc::new(Float64Array::from_iter_values(
                states.iter().map(|s| s.sum().delta()),
            )),
            Arc::new(Int64Array::from_iter_values(
                states.iter().map(AvgState::count),
            )),
        ]
    }

    fn evaluate_final(&self, selected: &[usize]) -> ArrayRef {
        Arc::new(
            selected
                .iter()
                .map(|&g| self.get(g).finish())
                .collect::<Float64Array>(),
        )
    }

    fn compact(&mut self, retained_groups: usize) {
        self.sums.shrink_to(retained_groups);
        self.deltas.shrink_to(retained_groups);
        self.counts.shrink_to(retained_groups);
    }

    fn reserved_bytes(&self) -> usize {
        self.sums.reserved_bytes() + self.deltas.reserved_bytes() + self.counts.reserved_bytes()
    }
}

/// Per-group max, min or sum. A group has a value once its bit in `seen` is set.
#[derive(Debug)]
struct LongGroupingState {
    op: LongOp,
    values: BigArray<i64>,
    seen: BitArray,
}

impl LongGroupingState {
    fn new(op: LongOp, name: &str, budget: &MemoryBudget) -> Self {
        Self {
            op,
            values: budget.new_long_array(format!("{name}.values")),
            seen: budget.new_bit_array(format!("{name}.seen")),
        }
    }

    fn get(&self, group: usize) -> Option<i64> {
        (group < self.values.len() && self.seen.get(group)).then(|| self.values.get(group))
    }

    /// Grow both the values and the seen bits, or neither.
    fn ensure_capacity(&mut self, group: usize) -> Result<()> {
        let values = self.values.len();
        self.values.ensure_capacity(group)?;
        self.seen
            .ensure_capacity(group)
            .inspect_err(|_| self.values.shrink_to(values))
    }

    fn add(&mut self, name: &str, group: usize, value: i64) -> Result<()> {
        self.ensure_capacity(group)?;
        let updated = match self.get(group) {
            Some(acc) => self.op.op(acc, value).ok_or_else(|| overflow(name))?,
            None => value,
        };
        self.values.set(group, updated);
        self.seen.set(group)
    }

    fn merge_from(&mut self, name: &str, other: &LongGroupingState) -> Result<()> {
        other
            .seen
            .ones()
            .filter_map(|group| other.get(group).map(|value| (group, value)))
            .try_for_each(|(group, value)| self.add(name, group, value))
    }

    fn evaluate(&self, selected: &[usize]) -> ArrayRef {
        Arc::new(
            selected
                .iter()
                .map(|&g| self.get(g))
                .collect::<Int64Array>(),
        )
    }

    fn compact(&mut self, retained_groups: usize) {
        self.values.shrink_to(retained_groups);
        self.seen.shrink_to(retained_groups);
    }

    fn reserved_bytes(&self) -> usize {
        self.values.reserved_bytes() + self.seen.reserved_bytes()
    }
}

/// Per-group counts. A count of zero is the identity so no seen tracking is needed.
#[derive(Debug)]
struct CountGroupingState {
    counts: BigArray<i64>,
}

impl CountGroupingState {
    fn new(name: &str, budget: &MemoryBudget) -> Self {
        Self {
            counts: budget.new_long_array(format!("{name}.counts")),
        }
    }

    fn get(&self, group: usize) -> i64 {
        if group < self.counts.len() {
            self.counts.get(group)
        } else {
            0
        }
    }

    fn add(&mut self, name: &str, group: usize, count: i64) -> Result<()> {
        self.counts.ensure_capacity(group)?;
        let updated = self
            .counts
            .get(group)
            .checked_add(count)
            .ok_or_else(|| overflow(name))?;
        self.counts.set(group, updated);
        Ok(())
    }

    fn merge_from(&mut self, name: &str, other: &CountGroupingState) -> Result<()> {
        (0..other.counts.len())
            .map(|group| (group, other.get(group)))
            .filter(|(_, count)| *count != 0)
            .try_for_each(|(group, count)| self.add(name, group, count))
    }

    fn evaluate(&self, selected: &[usize]) -> ArrayRef {
        Arc::new(Int64Array::from_iter_values(
            selected.iter().map(|&g| self.get(g)),
        ))
    }

    fn compact(&mut self, retained_groups: usize) {
        self.counts.shrink_to(retained_groups);
    }

    fn reserved_bytes(&self) -> usize {
        self.counts.reserved_bytes()
    }
}

/// One variant per supported function over longs.
#[derive(Debug)]
enum GroupingState {
    AvgLong(AvgGroupingState),
    MaxLong(LongGroupingState),
    MinLong(LongGroupingState),
    SumLong(LongGroupingState),
    CountLong(CountGroupingState),
}

/// A grouped aggregation function bound to its input channels.
///
/// Group ids are assigned by the caller, one per input row. The function owns its
/// arrays exclusively; they are released when it is closed or dropped.
#[derive(Debug)]
pub struct GroupingAggregatorFunction {
    channels: Vec<usize>,
    state: GroupingState,
}

impl GroupingAggregatorFunction {
    pub(crate) fn new(
        kind: AggregationFunctionKind,
        channels: Vec<usize>,
        budget: &MemoryBudget,
    ) -> Self {
        let name = kind.grouping_function_name();
        let state = match kind {
            AggregationFunctionKind::Avg => {
                GroupingState::AvgLong(AvgGroupingState::new(name, budget))
            }
            AggregationFunctionKind::Max => {
                GroupingState::MaxLong(LongGroupingState::new(LongOp::Max, name, budget))
            }
            AggregationFunctionKind::Min => {
                GroupingState::MinLong(LongGroupingState::new(LongOp::Min, name, budget))
            }
            AggregationFunctionKind::Sum => {
                GroupingState::SumLong(LongGroupingState::new(LongOp::Sum, name, budget))
            }
            AggregationFunctionKind::Count => {
                GroupingState::CountLong(CountGroupingState::new(name, budget))
            }
        };
        Self { channels, state }
    }

    #[must_use]
    pub fn kind(&self) -> AggregationFunctionKind {
        match self.state {
            GroupingState::AvgLong(_) => AggregationFunctionKind::Avg,
            GroupingState::MaxLong(_) => AggregationFunctionKind::Max,
            GroupingState::MinLong(_) => AggregationFunctionKind::Min,
            GroupingState::SumLong(_) => AggregationFunctionKind::Sum,
            GroupingState::CountLong(_) => AggregationFunctionKind::Count,
        }
    }

    #[must_use]
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    fn name(&self) -> &'static str {
        self.kind().grouping_function_name()
    }

    /// Bytes currently held from the memory budget.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        match &self.state {
            GroupingState::AvgLong(state) => state.reserved_bytes(),
            GroupingState::MaxLong(state)
            | GroupingState::MinLong(state)
            | GroupingState::SumLong(state) => state.reserved_bytes(),
            GroupingState::CountLong(state) => state.reserved_bytes(),
        }
    }

    /// Fold raw values into the accumulator of each row's group, growing the state to
    /// cover every group id seen. Null values are skipped.
    ///
    /// # Errors
    /// `group_ids` must hold one id per row. The function must be bound to exactly one
    /// `Int64` channel. Growth may exceed the memory budget, and a sum may overflow.
    pub fn add_raw_input(&mut self, group_ids: &[usize], batch: &RecordBatch) -> Result<()> {
        let name = self.name();
        check_channels(name, RAW_VALUES, &self.channels)?;
        let values = typed_column::<Int64Type>(name, batch, self.channels[0])?;
        match &mut self.state {
            GroupingState::AvgLong(state) => {
                accumulate(group_ids, values, |group, value| state.add(name, group, value))
            }
            GroupingState::MaxLong(state)
            | GroupingState::MinLong(state)
            | GroupingState::SumLong(state) => {
                accumulate(group_ids, values, |group, value| state.add(name, group, value))
            }
            GroupingState::CountLong(state) => {
                accumulate(group_ids, values, |group, _| state.add(name, group, 1))
            }
        }
    }

    /// Merge rows of partial state into the accumulator of each row's group.
    ///
    /// # Errors
    /// `group_ids` must hold one id per row. The function must be bound to exactly one
    /// channel holding this family's partial state. Growth may exceed the memory budget,
    /// and a sum or count may overflow.
    pub fn add_intermediate_input(
        &mut self,
        group_ids: &[usize],
        batch: &RecordBatch,
    ) -> Result<()> {
        let name = self.name();
        let kind = self.kind();
        check_channels(name, PARTIAL_STATE, &self.channels)?;
        let channel = self.channels[0];
        let partial = partial_state(kind, name, batch, channel)?;
        match &mut self.state {
            GroupingState::AvgLong(state) => {
                state.add_intermediate_input(name, group_ids, partial, channel)
            }
            GroupingState::MaxLong(state)
            | GroupingState::MinLong(state)
            | GroupingState::SumLong(state) => {
                let values = state_values::<Int64Type>(name, partial, 0, channel)?;
                accumulate(group_ids, &values, |group, value| state.add(name, group, value))
            }
            GroupingState::CountLong(state) => {
                let counts = state_values::<Int64Type>(name, partial, 0, channel)?;
                accumulate(group_ids, &counts, |group, count| state.add(name, group, count))
            }
        }
    }

    /// Merge group `other_group_id` of `other` into group `group_id` of this function.
    ///
    /// # Errors
    /// Both functions must be of the same family.
    pub fn add_intermediate_row(
        &mut self,
        group_id: usize,
        other: &GroupingAggregatorFunction,
        other_group_id: usize,
    ) -> Result<()> {
        let name = self.name();
        match (&mut self.state, &other.state) {
            (GroupingState::AvgLong(state), GroupingState::AvgLong(from)) => {
                let partial = from.get(other_group_id);
                if partial.count() > 0 {
                    state.merge(name, group_id, &partial)?;
                }
                Ok(())
            }
            (GroupingState::MaxLong(state), GroupingState::MaxLong(from))
            | (GroupingState::MinLong(state), GroupingState::MinLong(from))
            | (GroupingState::SumLong(state), GroupingState::SumLong(from)) => {
                match from.get(other_group_id) {
                    Some(value) => state.add(name, group_id, value),
                    None => Ok(()),
                }
            }
            (GroupingState::CountLong(state), GroupingState::CountLong(from)) => {
                match from.get(other_group_id) {
                    0 => Ok(()),
                    count => state.add(name, group_id, count),
                }
            }
            _ => Err(incompatible(name, other)),
        }
    }

    /// Merge every group of `other` into the group with the same id here. `other` is only
    /// borrowed for the call; its owner remains responsible for closing it.
    ///
    /// # Errors
    /// Both functions must be of the same family. Growth may exceed the memory budget.
    pub fn merge_from(&mut self, other: &GroupingAggregatorFunction) -> Result<()> {
        let name = self.name();
        match (&mut self.state, &other.state) {
            (GroupingState::AvgLong(state), GroupingState::AvgLong(from)) => {
                state.merge_from(name, from)
            }
            (GroupingState::MaxLong(state), GroupingState::MaxLong(from))
            | (GroupingState::MinLong(state), GroupingState::MinLong(from))
            | (GroupingState::SumLong(state), GroupingState::SumLong(from)) => {
                state.merge_from(name, from)
            }
            (GroupingState::CountLong(state), GroupingState::CountLong(from)) => {
                state.merge_from(name, from)
            }
            _ => Err(incompatible(name, other)),
        }
    }

    /// Partial state of the `selected` groups, in the given order, as one struct column.
    ///
    /// # Errors
    /// If the struct column cannot be assembled.
    pub fn evaluate_intermediate(&self, selected: &[usize]) -> Result<ArrayRef> {
        let columns = match &self.state {
            GroupingState::AvgLong(state) => state.evaluate_intermediate(selected),
            GroupingState::MaxLong(state)
            | GroupingState::MinLong(state)
            | GroupingState::SumLong(state) => vec![state.evaluate(selected)],
            GroupingState::CountLong(state) => vec![state.evaluate(selected)],
        };
        pack_state(self.kind(), columns)
    }

    /// Final results of the `selected` groups, in the given order.
    #[must_use]
    pub fn evaluate_final(&self, selected: &[usize]) -> ArrayRef {
        match &self.state {
            GroupingState::AvgLong(state) => state.evaluate_final(selected),
            GroupingState::MaxLong(state)
            | GroupingState::MinLong(state)
            | GroupingState::SumLong(state) => state.evaluate(selected),
            GroupingState::CountLong(state) => state.evaluate(selected),
        }
    }

    /// Drop the state of every group id at or beyond `retained_groups` and return the
    /// freed memory to the budget.
    pub fn compact(&mut self, retained_groups: usize) {
        let before = self.reserved_bytes();
        match &mut self.state {
            GroupingState::AvgLong(state) => state.compact(retained_groups),
            GroupingState::MaxLong(state)
            | GroupingState::MinLong(state)
            | GroupingState::SumLong(state) => state.compact(retained_groups),
            GroupingState::CountLong(state) => state.compact(retained_groups),
        }
        debug!(
            "Compacted {self} to {retained_groups} groups, released {} bytes",
            before - self.reserved_bytes()
        );
    }

    /// Release all state and its reserved memory.
    pub fn close(self) {
        drop(self);
    }
}

fn incompatible(into: &str, other: &GroupingAggregatorFunction) -> AggregationError {
    AggregationError::IncompatibleMerge {
        into: into.to_owned(),
        from: other.name().to_owned(),
    }
}

impl Display for GroupingAggregatorFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[channels={:?}]", self.name(), self.channels)
    }
}
