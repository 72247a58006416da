//! Null-aware iteration over input columns, shared by the ungrouped and grouped functions.
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
use crate::error::{AggregationError, Result};
use arrow::{
    array::{Array, PrimitiveArray},
    datatypes::ArrowPrimitiveType,
};

/// Invokes `value_fn(row, value)` for each non null row of `values`, in row order.
/// Stops at the first error.
pub(crate) fn for_each_valid<T, F>(values: &PrimitiveArray<T>, mut value_fn: F) -> Result<()>
where
    T: ArrowPrimitiveType,
    F: FnMut(usize, T::Native) -> Result<()>,
{
    match values.nulls().filter(|nulls| nulls.null_count() > 0) {
        // no nulls
        None => values
            .values()
            .iter()
            .enumerate()
            .try_for_each(|(row, value)| value_fn(row, *value)),
        // nulls are skipped
        Some(nulls) => values
            .values()
            .iter()
            .zip(nulls.iter())
            .enumerate()
            .filter(|(_, (_, is_valid))| *is_valid)
            .try_for_each(|(row, (value, _))| value_fn(row, *value)),
    }
}

/// Invokes `value_fn(group_index, value)` for each non null row of `values`,
/// where `group_index` is `group_indices[row]`.
///
/// ```text
///  ┌─────────┐   ┌─────────┐
///  │ ┌─────┐ │   │ ┌─────┐ │
///  │ │  2  │ │   │ │ 200 │ │
///  │ ├─────┤ │   │ ├─────┤ │
///  │ │  0  │ │   │ │NULL │ │
///  │ ├─────┤ │   │ ├─────┤ │
///  │ │  0  │ │   │ │ 300 │ │
///  │ └─────┘ │   │ └─────┘ │
///  └─────────┘   └─────────┘
///
/// group_indices   values
/// ```
///
/// In the example above `value_fn(2, 200)` then `value_fn(0, 300)` are invoked.
///
/// # Errors
/// There must be exactly one group index per row.
pub(crate) fn accumulate<T, F>(
    group_indices: &[usize],
    values: &PrimitiveArray<T>,
    mut value_fn: F,
) -> Result<()>
where
    T: ArrowPrimitiveType,
    F: FnMut(usize, T::Native) -> Result<()>,
{
    check_group_count(group_indices, values.len())?;
    for_each_valid(values, |row, value| value_fn(group_indices[row], value))
}

/// Check there is one group index for each of `rows` rows.
pub(crate) fn check_group_count(group_indices: &[usize], rows: usize) -> Result<()> {
    if group_indices.len() == rows {
        Ok(())
    } else {
        Err(AggregationError::InvalidGroupId {
            row: group_indices.len().min(rows),
            reason: format!(
                "expected {rows} group ids, one per row, found {}",
                group_indices.len()
            ),
        })
    }
}
