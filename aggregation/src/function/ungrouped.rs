//! Aggregation functions that fold every input row into a single accumulator.
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
    accumulate::for_each_valid,
    check_channels, pack_state, partial_state,
    state::{AvgState, CompensatedSum, LongOp, LongState},
    state_values, typed_column,
};
use crate::error::{AggregationError, Result};
use arrow::{
    array::{Array, ArrayRef, Float64Array, Int64Array},
    datatypes::{Float64Type, Int64Type},
    record_batch::RecordBatch,
};
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

/// One variant per supported function over longs.
#[derive(Debug, Clone, PartialEq)]
enum FunctionState {
    AvgLong(AvgState),
    MaxLong(LongState),
    MinLong(LongState),
    SumLong(LongState),
    CountLong(i64),
}

/// An ungrouped aggregation function bound to its input channels.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorFunction {
    channels: Vec<usize>,
    state: FunctionState,
}

impl AggregatorFunction {
    pub(crate) fn new(kind: AggregationFunctionKind, channels: Vec<usize>) -> Self {
        let state = match kind {
            AggregationFunctionKind::Avg => FunctionState::AvgLong(AvgState::default()),
            AggregationFunctionKind::Max => FunctionState::MaxLong(LongState::default()),
            AggregationFunctionKind::Min => FunctionState::MinLong(LongState::default()),
            AggregationFunctionKind::Sum => FunctionState::SumLong(LongState::default()),
            AggregationFunctionKind::Count => FunctionState::CountLong(0),
        };
        Self { channels, state }
    }

    #[must_use]
    pub fn kind(&self) -> AggregationFunctionKind {
        match self.state {
            FunctionState::AvgLong(_) => AggregationFunctionKind::Avg,
            FunctionState::MaxLong(_) => AggregationFunctionKind::Max,
            FunctionState::MinLong(_) => AggregationFunctionKind::Min,
            FunctionState::SumLong(_) => AggregationFunctionKind::Sum,
            FunctionState::CountLong(_) => AggregationFunctionKind::Count,
        }
    }

    #[must_use]
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    fn name(&self) -> &'static str {
        self.kind().function_name()
    }

    /// Fold the raw values on this function's single input channel into the state.
    /// Null values are skipped.
    ///
    /// # Errors
    /// The function must be bound to exactly one `Int64` channel. A sum that overflows
    /// fails with [`AggregationError::ArithmeticOverflow`].
    pub fn add_raw_input(&mut self, batch: &RecordBatch) -> Result<()> {
        let name = self.name();
        check_channels(name, RAW_VALUES, &self.channels)?;
        let values = typed_column::<Int64Type>(name, batch, self.channels[0])?;
        match &mut self.state {
            FunctionState::AvgLong(state) => for_each_valid(values, |_, value| {
                state.add(value).map(|_| ()).ok_or_else(|| overflow(name))
            }),
            FunctionState::MaxLong(state) => add_longs(name, state, LongOp::Max, values),
            FunctionState::MinLong(state) => add_longs(name, state, LongOp::Min, values),
            FunctionState::SumLong(state) => add_longs(name, state, LongOp::Sum, values),
            FunctionState::CountLong(count) => {
                let rows = i64::try_from(values.len() - values.null_count())
                    .map_err(|_| overflow(name))?;
                *count = count.checked_add(rows).ok_or_else(|| overflow(name))?;
                Ok(())
            }
        }
    }

    /// Merge every row of partial state found on this function's channel, as produced by
    /// [`AggregatorFunction::evaluate_intermediate`] of other instances.
    ///
    /// # Errors
    /// The function must be bound to exactly one channel holding this family's partial
    /// state. Counts that overflow fail with [`AggregationError::ArithmeticOverflow`].
    pub fn add_intermediate_input(&mut self, batch: &RecordBatch) -> Result<()> {
        let name = self.name();
        let kind = self.kind();
        check_channels(name, PARTIAL_STATE, &self.channels)?;
        let channel = self.channels[0];
        let partial = partial_state(kind, name, batch, channel)?;
        match &mut self.state {
            FunctionState::AvgLong(state) => {
                let sums = state_values::<Float64Type>(name, partial, 0, channel)?;
                let deltas = state_values::<Float64Type>(name, partial, 1, channel)?;
                let counts = state_values::<Int64Type>(name, partial, 2, channel)?;
                for_each_valid(&counts, |row, count| {
                    if sums.is_valid(row) && deltas.is_valid(row) {
                        state
                            .merge(&AvgState::new(
                                CompensatedSum::new(sums.value(row), deltas.value(row)),
                                count,
                            ))
                            .map(|_| ())
                            .ok_or_else(|| overflow(name))
                    } else {
                        Ok(())
                    }
                })
            }
            FunctionState::MaxLong(state) => {
                let values = state_values::<Int64Type>(name, partial, 0, channel)?;
                add_longs(name, state, LongOp::Max, &values)
            }
            FunctionState::MinLong(state) => {
                let values = state_values::<Int64Type>(name, partial, 0, channel)?;
                add_longs(name, state, LongOp::Min, &values)
            }
            FunctionState::SumLong(state) => {
                let values = state_values::<Int64Type>(name, partial, 0, channel)?;
                add_longs(name, state, LongOp::Sum, &values)
            }
            FunctionState::CountLong(count) => {
                let counts = state_values::<Int64Type>(name, partial, 0, channel)?;
                for_each_valid(&counts, |_, partial| {
                    *count = count.checked_add(partial).ok_or_else(|| overflow(name))?;
                    Ok(())
                })
            }
        }
    }

    /// The partial state as a single-row struct column.
    ///
    /// # Errors
    /// If the struct column cannot be assembled.
    pub fn evaluate_intermediate(&self) -> Result<ArrayRef> {
        let columns = match &self.state {
            FunctionState::AvgLong(state) => vec![
                Arc::new(Float64Array::from(vec![state.sum().value()])) as ArrayRef,
                Arc::new(Float64Array::from(vec![state.sum().delta()])),
                Arc::new(Int64Array::from(vec![state.count()])),
            ],
            FunctionState::MaxLong(state)
            | FunctionState::MinLong(state)
            | FunctionState::SumLong(state) => {
                vec![Arc::new(Int64Array::from(vec![state.value()])) as ArrayRef]
            }
            FunctionState::CountLong(count) => {
                vec![Arc::new(Int64Array::from(vec![*count])) as ArrayRef]
            }
        };
        pack_state(self.kind(), columns)
    }

    /// The final result as a single-row column. Functions that saw no values produce
    /// null, apart from count which produces zero.
    #[must_use]
    pub fn evaluate_final(&self) -> ArrayRef {
        match &self.state {
            FunctionState::AvgLong(state) => Arc::new(Float64Array::from(vec![state.finish()])),
            FunctionState::MaxLong(state)
            | FunctionState::MinLong(state)
            | FunctionState::SumLong(state) => Arc::new(Int64Array::from(vec![state.value()])),
            FunctionState::CountLong(count) => Arc::new(Int64Array::from(vec![*count])),
        }
    }
}

impl Display for AggregatorFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[channels={:?}]", self.name(), self.channels)
    }
}

pub(crate) fn overflow(function: &str) -> AggregationError {
    AggregationError::ArithmeticOverflow {
        function: function.to_owned(),
    }
}

fn add_longs(
    name: &str,
    state: &mut LongState,
    op: LongOp,
    values: &Int64Array,
) -> Result<()> {
    for_each_valid(values, |_, value| {
        state
            .add(op, value)
            .map(|_| ())
            .ok_or_else(|| overflow(name))
    })
}
