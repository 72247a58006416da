//! Aggregation function families and the suppliers that instantiate them.
//!
//! Every family exists in an ungrouped flavour ([`AggregatorFunction`]) that keeps a
//! single accumulator and a grouped flavour ([`GroupingAggregatorFunction`]) that keeps
//! one accumulator per group id in budget-accounted arrays.
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
    aggregator::{AggregatorFactory, GroupingAggregatorFactory},
    error::{AggregationError, Result},
    memory::MemoryBudget,
    mode::AggregatorMode,
};
use arrow::{
    array::{Array, ArrayRef, AsArray, PrimitiveArray, StructArray},
    buffer::NullBuffer,
    datatypes::{ArrowPrimitiveType, DataType, Field, Fields},
    record_batch::RecordBatch,
};
use std::sync::Arc;

mod accumulate;
pub mod grouping;
pub mod state;
pub mod ungrouped;

pub use grouping::GroupingAggregatorFunction;
pub use ungrouped::AggregatorFunction;

pub(crate) const RAW_VALUES: &str = "raw values";
pub(crate) const PARTIAL_STATE: &str = "partial state";

/// The closed set of supported aggregation families over 64-bit integer input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationFunctionKind {
    Avg,
    Max,
    Min,
    Sum,
    Count,
}

impl AggregationFunctionKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
            Self::Sum => "sum",
            Self::Count => "count",
        }
    }

    /// Human readable description, for diagnostics only.
    #[must_use]
    pub fn describe(self) -> String {
        format!("{} of longs", self.name())
    }

    /// Fields of this family's partial state. The state travels between stages as a
    /// single struct column of these fields, so raw values and partial state can never be
    /// mistaken for each other.
    #[must_use]
    pub fn intermediate_fields(self) -> Fields {
        match self {
            Self::Avg => Fields::from(vec![
                Field::new("sum", DataType::Float64, true),
                Field::new("delta", DataType::Float64, true),
                Field::new("count", DataType::Int64, true),
            ]),
            Self::Max | Self::Min | Self::Sum | Self::Count => {
                Fields::from(vec![Field::new(self.name(), DataType::Int64, true)])
            }
        }
    }

    /// Type of the column carrying this family's partial state.
    #[must_use]
    pub fn intermediate_type(self) -> DataType {
        DataType::Struct(self.intermediate_fields())
    }

    /// Type of the final result column.
    #[must_use]
    pub fn final_type(self) -> DataType {
        match self {
            Self::Avg => DataType::Float64,
            Self::Max | Self::Min | Self::Sum | Self::Count => DataType::Int64,
        }
    }

    pub(crate) fn function_name(self) -> &'static str {
        match self {
            Self::Avg => "AvgLongAggregatorFunction",
            Self::Max => "MaxLongAggregatorFunction",
            Self::Min => "MinLongAggregatorFunction",
            Self::Sum => "SumLongAggregatorFunction",
            Self::Count => "CountLongAggregatorFunction",
        }
    }

    pub(crate) fn grouping_function_name(self) -> &'static str {
        match self {
            Self::Avg => "AvgLongGroupingAggregatorFunction",
            Self::Max => "MaxLongGroupingAggregatorFunction",
            Self::Min => "MinLongGroupingAggregatorFunction",
            Self::Sum => "SumLongGroupingAggregatorFunction",
            Self::Count => "CountLongGroupingAggregatorFunction",
        }
    }
}

impl TryFrom<&str> for AggregationFunctionKind {
    type Error = AggregationError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        match name.to_lowercase().as_str() {
            "avg" => Ok(Self::Avg),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            _ => Err(AggregationError::InvalidConfig(format!(
                "unrecognised aggregation function name \"{name}\""
            ))),
        }
    }
}

/// Instantiates aggregation functions of one family bound to fixed input channels.
///
/// The channels are the raw value channel when the resulting aggregator reads raw
/// values, or one channel per partial state column when it reads partial state.
#[derive(Debug, Clone)]
pub struct AggregatorFunctionSupplier {
    kind: AggregationFunctionKind,
    budget: MemoryBudget,
    channels: Vec<usize>,
}

impl AggregatorFunctionSupplier {
    #[must_use]
    pub fn new(kind: AggregationFunctionKind, budget: MemoryBudget, channels: Vec<usize>) -> Self {
        Self {
            kind,
            budget,
            channels,
        }
    }

    #[must_use]
    pub fn kind(&self) -> AggregationFunctionKind {
        self.kind
    }

    #[must_use]
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    /// A fresh single accumulator function.
    #[must_use]
    pub fn aggregator(&self) -> AggregatorFunction {
        AggregatorFunction::new(self.kind, self.channels.clone())
    }

    /// A fresh per-group function whose arrays draw from this supplier's budget.
    #[must_use]
    pub fn grouping_aggregator(&self) -> GroupingAggregatorFunction {
        GroupingAggregatorFunction::new(self.kind, self.channels.clone(), &self.budget)
    }

    /// # Errors
    /// The supplier must be bound to exactly one channel: the raw value channel, or the
    /// partial state channel when `mode` reads partial state.
    pub fn aggregator_factory(&self, mode: AggregatorMode) -> Result<AggregatorFactory> {
        check_channels(self.kind.function_name(), reading(mode), &self.channels)?;
        Ok(AggregatorFactory::new(self.clone(), mode))
    }

    /// # Errors
    /// As for [`AggregatorFunctionSupplier::aggregator_factory`].
    pub fn grouping_aggregator_factory(
        &self,
        mode: AggregatorMode,
    ) -> Result<GroupingAggregatorFactory> {
        check_channels(
            self.kind.grouping_function_name(),
            reading(mode),
            &self.channels,
        )?;
        Ok(GroupingAggregatorFactory::new(self.clone(), mode))
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.kind.describe()
    }
}

/// What a function running in `mode` reads from its channel.
fn reading(mode: AggregatorMode) -> &'static str {
    if mode.is_input_partial() {
        PARTIAL_STATE
    } else {
        RAW_VALUES
    }
}

/// Check a function was bound to the single channel it reads.
pub(crate) fn check_channels(
    function: &str,
    reading: &'static str,
    channels: &[usize],
) -> Result<()> {
    if channels.len() == 1 {
        Ok(())
    } else {
        Err(AggregationError::InvalidChannels {
            function: function.to_owned(),
            reading,
            expected: 1,
            found: channels.len(),
        })
    }
}

fn input_column<'a>(batch: &'a RecordBatch, channel: usize) -> Result<&'a ArrayRef> {
    batch
        .columns()
        .get(channel)
        .ok_or(AggregationError::ChannelOutOfBounds {
            channel,
            columns: batch.num_columns(),
        })
}

/// Fetch column `channel` of `batch` as raw values of type `T`.
///
/// # Errors
/// The channel must exist, and the column must be of type `T`. Partial state handed to a
/// raw value reader is a struct column and fails here.
pub(crate) fn typed_column<'a, T: ArrowPrimitiveType>(
    function: &str,
    batch: &'a RecordBatch,
    channel: usize,
) -> Result<&'a PrimitiveArray<T>> {
    let column = input_column(batch, channel)?;
    column
        .as_primitive_opt::<T>()
        .ok_or_else(|| AggregationError::InvalidModeTransition {
            function: function.to_owned(),
            reading: RAW_VALUES,
            channel,
            expected: T::DATA_TYPE,
            found: column.data_type().clone(),
        })
}

/// Fetch column `channel` of `batch` as partial state of a `kind` function.
///
/// # Errors
/// The channel must exist and hold a struct column of exactly `kind`'s partial state
/// fields. Raw values handed to a partial state reader fail here.
pub(crate) fn partial_state<'a>(
    kind: AggregationFunctionKind,
    function: &str,
    batch: &'a RecordBatch,
    channel: usize,
) -> Result<&'a StructArray> {
    let column = input_column(batch, channel)?;
    let expected = kind.intermediate_type();
    let matches = column.data_type() == &expected;
    column
        .as_struct_opt()
        .filter(|_| matches)
        .ok_or_else(|| AggregationError::InvalidModeTransition {
            function: function.to_owned(),
            reading: PARTIAL_STATE,
            channel,
            expected,
            found: column.data_type().clone(),
        })
}

/// Field `index` of a partial state column. Rows where the struct itself is null read
/// as null.
pub(crate) fn state_values<T: ArrowPrimitiveType>(
    function: &str,
    state: &StructArray,
    index: usize,
    channel: usize,
) -> Result<PrimitiveArray<T>> {
    let column = state.column(index);
    let values =
        column
            .as_primitive_opt::<T>()
            .ok_or_else(|| AggregationError::InvalidModeTransition {
                function: function.to_owned(),
                reading: PARTIAL_STATE,
                channel,
                expected: T::DATA_TYPE,
                found: column.data_type().clone(),
            })?;
    let nulls = NullBuffer::union(state.nulls(), values.nulls());
    Ok(PrimitiveArray::<T>::try_new(values.values().clone(), nulls)?)
}

/// Pack the columns of a `kind` function's partial state into one struct column.
pub(crate) fn pack_state(kind: AggregationFunctionKind, columns: Vec<ArrayRef>) -> Result<ArrayRef> {
    Ok(Arc::new(StructArray::try_new(
        kind.intermediate_fields(),
        columns,
        None,
    )?))
}
