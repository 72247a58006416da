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
mod aggregation_helpers;

use aggregation::{AggregationFunctionKind, AggregatorMode, MemoryBudget};
use aggregation_helpers::*;
use arrow::{
    array::{Array, AsArray},
    datatypes::{Float64Type, Int64Type},
    record_batch::RecordBatch,
};
use color_eyre::eyre::Error;
use rand::Rng;
use test_log::test;

#[test]
fn should_average_and_max_single_group() -> Result<(), Error> {
    // Given
    let budget = MemoryBudget::unbounded();
    let kinds = [AggregationFunctionKind::Avg, AggregationFunctionKind::Max];
    let mut operator = operator_factory(&kinds, AggregatorMode::Single, &budget)?.get();

    // When
    let output = run(
        &mut operator,
        &[raw_batch(&[Some(1), Some(2), Some(3), Some(4), Some(5)])?],
    )?;

    // Then
    assert_eq!([output.num_rows(), output.num_columns()], [1, 2]);
    assert_eq!(output.column(0).as_primitive::<Float64Type>().value(0), 3.0);
    assert_eq!(output.column(1).as_primitive::<Int64Type>().value(0), 5);
    Ok(())
}

#[test]
fn should_reproduce_single_result_from_split_partial_states() -> Result<(), Error> {
    // Given
    let budget = MemoryBudget::unbounded();
    let kinds = [AggregationFunctionKind::Avg, AggregationFunctionKind::Max];
    let initial = operator_factory(&kinds, AggregatorMode::Initial, &budget)?;
    let first = run(&mut initial.get(), &[raw_batch(&[Some(1), Some(2)])?])?;
    let second = run(
        &mut initial.get(),
        &[raw_batch(&[Some(3), Some(4), Some(5)])?],
    )?;

    // When
    let output = run(
        &mut operator_factory(&kinds, AggregatorMode::Final, &budget)?.get(),
        &[first, second],
    )?;

    // Then
    assert_eq!(output.column(0).as_primitive::<Float64Type>().value(0), 3.0);
    assert_eq!(output.column(1).as_primitive::<Int64Type>().value(0), 5);
    Ok(())
}

#[test]
fn should_agree_across_modes_for_any_split() -> Result<(), Error> {
    let budget = MemoryBudget::unbounded();
    let mut rng = seeded(7);
    for _ in 0..20 {
        // Given
        let values = random_values(&mut rng, 200);
        let split = rng.random_range(0..=values.len());
        let (left, right) = values.split_at(split);
        let single = run(
            &mut operator_factory(&ALL_KINDS, AggregatorMode::Single, &budget)?.get(),
            &[raw_batch(&values)?],
        )?;

        // When
        let initial = operator_factory(&ALL_KINDS, AggregatorMode::Initial, &budget)?;
        let left = run(&mut initial.get(), &[raw_batch(left)?])?;
        let right = run(&mut initial.get(), &[raw_batch(right)?])?;
        let intermediate = run(
            &mut operator_factory(&ALL_KINDS, AggregatorMode::Intermediate, &budget)?.get(),
            &[right.clone(), left.clone()],
        )?;
        let left_then_right = run(
            &mut operator_factory(&ALL_KINDS, AggregatorMode::Final, &budget)?.get(),
            &[left, right],
        )?;
        let via_intermediate = run(
            &mut operator_factory(&ALL_KINDS, AggregatorMode::Final, &budget)?.get(),
            &[intermediate],
        )?;

        // Then
        assert_same_columns(&left_then_right, &single);
        assert_same_columns(&via_intermediate, &single);
    }
    Ok(())
}

fn assert_same_columns(actual: &RecordBatch, expected: &RecordBatch) {
    assert_eq!(actual.num_columns(), expected.num_columns());
    for (index, (a, e)) in actual.columns().iter().zip(expected.columns()).enumerate() {
        assert_eq!(a.as_ref(), e.as_ref(), "column {index}");
    }
}

#[test]
fn should_produce_identities_for_empty_input() -> Result<(), Error> {
    for mode in [AggregatorMode::Single, AggregatorMode::Final] {
        // Given
        let budget = MemoryBudget::unbounded();
        let mut operator = operator_factory(&ALL_KINDS, mode, &budget)?.get();

        // When
        let output = run(&mut operator, &[])?;

        // Then
        assert_eq!(output.num_rows(), 1);
        assert_eq!(output.num_columns(), ALL_KINDS.len());
        for column in 0..4 {
            assert!(output.column(column).is_null(0), "{mode} column {column}");
        }
        assert_eq!(output.column(4).as_primitive::<Int64Type>().value(0), 0);
    }
    Ok(())
}

#[test]
fn should_emit_partial_state_columns_for_empty_input() -> Result<(), Error> {
    // Given
    let budget = MemoryBudget::unbounded();
    let mut operator = operator_factory(&ALL_KINDS, AggregatorMode::Initial, &budget)?.get();

    // When
    let output = run(&mut operator, &[])?;

    // Then
    assert_eq!(output.num_rows(), 1);
    assert_eq!(
        output
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect::<Vec<_>>(),
        vec!["avg", "max", "min", "sum", "count"]
    );
    assert_eq!(output.column(0).as_struct().num_columns(), 3);
    Ok(())
}

#[test]
fn should_skip_null_values() -> Result<(), Error> {
    // Given
    let budget = MemoryBudget::unbounded();
    let kinds = [AggregationFunctionKind::Avg, AggregationFunctionKind::Count];
    let mut operator = operator_factory(&kinds, AggregatorMode::Single, &budget)?.get();

    // When
    let output = run(&mut operator, &[raw_batch(&[Some(2), None, Some(4)])?])?;

    // Then
    assert_eq!(output.column(0).as_primitive::<Float64Type>().value(0), 3.0);
    assert_eq!(output.column(1).as_primitive::<Int64Type>().value(0), 2);
    Ok(())
}

#[test]
fn should_fail_on_sum_overflow() -> Result<(), Error> {
    // Given
    let budget = MemoryBudget::unbounded();
    let mut operator =
        operator_factory(&[AggregationFunctionKind::Sum], AggregatorMode::Single, &budget)?.get();

    // When
    let result = operator.add_input(&raw_batch(&[Some(i64::MAX), Some(1)])?);

    // Then
    assert_eq!(
        result.err().map(|e| e.to_string()),
        Some("SumLongAggregatorFunction overflowed".to_string())
    );
    Ok(())
}

#[test]
fn should_describe_operator() -> Result<(), Error> {
    let budget = MemoryBudget::unbounded();
    let kinds = [AggregationFunctionKind::Avg, AggregationFunctionKind::Max];
    assert_eq!(
        operator_factory(&kinds, AggregatorMode::Single, &budget)?.describe(),
        "AggregationOperator[mode = SINGLE, aggs = avg of longs, max of longs]"
    );
    assert_eq!(
        operator_factory(&kinds, AggregatorMode::Single, &budget)?
            .get()
            .to_string(),
        "AggregationOperator[aggregators=[\
        Aggregator[aggregatorFunction=AvgLongAggregatorFunction[channels=[0]], mode=SINGLE], \
        Aggregator[aggregatorFunction=MaxLongAggregatorFunction[channels=[0]], mode=SINGLE]]]"
    );
    Ok(())
}
