//! The `aggregation` crate implements a columnar aggregation engine over Arrow record
//! batches. Aggregation functions can run as a single pass or split into a partial stage
//! and a final stage, so that partial state computed on many partitions or threads can be
//! merged and finalised elsewhere.
//!
//! Per-group state is held in growable arrays that reserve every byte from a shared
//! [`MemoryBudget`] before allocating, so a query fails cleanly with
//! [`AggregationError::MemoryLimitExceeded`] rather than exhausting the host.
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

//! # Examples
//! ```
//! # use std::sync::Arc;
//! # use arrow::array::{ArrayRef, AsArray, Int64Array};
//! # use arrow::datatypes::{DataType, Field, Float64Type, Schema};
//! # use arrow::record_batch::RecordBatch;
//! use aggregation::{
//!     AggregationConfigBuilder, AggregationFunctionKind, AggregationOperatorFactory,
//!     AggregatorFunctionSupplier, AggregatorMode,
//! };
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AggregationConfigBuilder::new()
//!     .memory_limit(Some(1 << 20))
//!     .build()?;
//! let budget = config.memory_budget();
//! let avg = AggregatorFunctionSupplier::new(AggregationFunctionKind::Avg, budget, vec![0]);
//! let factory = AggregationOperatorFactory::new(
//!     AggregatorMode::Single,
//!     vec![avg.aggregator_factory(AggregatorMode::Single)?],
//! )?;
//! assert_eq!(factory.describe(), "AggregationOperator[mode = SINGLE, aggs = avg of longs]");
//!
//! let mut operator = factory.get();
//! let batch = RecordBatch::try_new(
//!     Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)])),
//!     vec![Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])) as ArrayRef],
//! )?;
//! operator.add_input(&batch)?;
//! operator.finish()?;
//! let output = operator.get_output().ok_or("no output")?;
//! assert_eq!(output.column(0).as_primitive::<Float64Type>().value(0), 3.0);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod function;
pub mod log;
pub mod memory;
pub mod mode;
pub mod operator;

pub use aggregator::{Aggregator, AggregatorFactory, GroupingAggregator, GroupingAggregatorFactory};
pub use config::{AggregationConfig, AggregationConfigBuilder};
pub use error::{AggregationError, Result};
pub use function::{
    AggregationFunctionKind, AggregatorFunction, AggregatorFunctionSupplier,
    GroupingAggregatorFunction,
};
pub use memory::{BigArray, BitArray, MemoryBudget};
pub use mode::AggregatorMode;
pub use operator::{
    AggregationOperator, AggregationOperatorFactory, GroupingAggregationOperator,
    GroupingAggregationOperatorFactory,
};
