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
#![allow(dead_code)]

use aggregation::{
    AggregationFunctionKind, AggregationOperator, AggregationOperatorFactory,
    AggregatorFunctionSupplier, AggregatorMode, GroupingAggregationOperator,
    GroupingAggregationOperatorFactory, MemoryBudget,
};
use arrow::{
    array::{ArrayRef, Int64Array},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use color_eyre::eyre::{Result, eyre};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::Arc;

pub const ALL_KINDS: [AggregationFunctionKind; 5] = [
    AggregationFunctionKind::Avg,
    AggregationFunctionKind::Max,
    AggregationFunctionKind::Min,
    AggregationFunctionKind::Sum,
    AggregationFunctionKind::Count,
];

/// A batch with one nullable `Int64` column.
pub fn raw_batch(values: &[Option<i64>]) -> Result<RecordBatch> {
    Ok(RecordBatch::try_new(
        Arc::new(Schema::new(vec![Field::new("value", DataType::Int64, true)])),
        vec![Arc::new(Int64Array::from(values.to_vec())) as ArrayRef],
    )?)
}

/// A batch with group ids on channel 0 and values on channel 1.
pub fn grouped_batch(rows: &[(i64, Option<i64>)]) -> Result<RecordBatch> {
    Ok(RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("group", DataType::Int64, false),
            Field::new("value", DataType::Int64, true),
        ])),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|(g, _)| *g))) as ArrayRef,
            Arc::new(rows.iter().map(|(_, v)| *v).collect::<Int64Array>()),
        ],
    )?)
}

/// Seeded random values, roughly one in ten null. Small enough that sums and averages
/// stay exact whatever order they are folded in.
pub fn random_values(rng: &mut StdRng, len: usize) -> Vec<Option<i64>> {
    (0..len)
        .map(|_| (!rng.random_bool(0.1)).then(|| rng.random_range(-1000..1000)))
        .collect()
}

/// Seeded random rows spread over `groups` group ids.
pub fn random_rows(rng: &mut StdRng, len: usize, groups: i64) -> Vec<(i64, Option<i64>)> {
    random_values(rng, len)
        .into_iter()
        .map(|value| (rng.random_range(0..groups), value))
        .collect()
}

#[must_use]
pub fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Channel each of `kinds` reads in `mode`. Raw values all come from `first`, partial
/// state is one column per aggregator laid out in `kinds` order from `first`.
pub fn channels_for(
    kinds: &[AggregationFunctionKind],
    mode: AggregatorMode,
    first: usize,
) -> Vec<Vec<usize>> {
    (0..kinds.len())
        .map(|i| {
            if mode.is_input_partial() {
                vec![first + i]
            } else {
                vec![first]
            }
        })
        .collect()
}

/// An ungrouped operator over `kinds` reading channel 0, or partial state laid out in
/// `kinds` order in partial input modes.
pub fn operator_factory(
    kinds: &[AggregationFunctionKind],
    mode: AggregatorMode,
    budget: &MemoryBudget,
) -> Result<AggregationOperatorFactory> {
    let aggregators = kinds
        .iter()
        .zip(channels_for(kinds, mode, 0))
        .map(|(kind, channels)| {
            AggregatorFunctionSupplier::new(*kind, budget.clone(), channels).aggregator_factory(mode)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AggregationOperatorFactory::new(mode, aggregators)?)
}

/// A grouping operator over `kinds` with group ids on channel 0, reading values from
/// channel 1 or partial state laid out from channel 1 in partial input modes.
pub fn grouping_operator_factory(
    kinds: &[AggregationFunctionKind],
    mode: AggregatorMode,
    budget: &MemoryBudget,
) -> Result<GroupingAggregationOperatorFactory> {
    let aggregators = kinds
        .iter()
        .zip(channels_for(kinds, mode, 1))
        .map(|(kind, channels)| {
            AggregatorFunctionSupplier::new(*kind, budget.clone(), channels)
                .grouping_aggregator_factory(mode)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(GroupingAggregationOperatorFactory::new(
        mode,
        0,
        aggregators,
        budget.clone(),
    )?)
}

pub fn run(operator: &mut AggregationOperator, batches: &[RecordBatch]) -> Result<RecordBatch> {
    for batch in batches {
        operator.add_input(batch)?;
    }
    operator.finish()?;
    operator.get_output().ok_or_else(|| eyre!("operator produced no output"))
}

pub fn run_grouped(
    operator: &mut GroupingAggregationOperator,
    batches: &[RecordBatch],
) -> Result<RecordBatch> {
    for batch in batches {
        operator.add_input(batch)?;
    }
    operator.finish()?;
    operator.get_output().ok_or_else(|| eyre!("operator produced no output"))
}
