//! Operators drive a fixed set of aggregators over a stream of batches.
//!
//! The driver repeatedly offers batches while [`AggregationOperator::needs_input`] holds,
//! signals end of input with [`AggregationOperator::finish`] and then pulls the single
//! result batch with [`AggregationOperator::get_output`].
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
    aggregator::{Aggregator, AggregatorFactory},
    error::{AggregationError, Result},
    mode::AggregatorMode,
};
use arrow::{
    datatypes::Schema,
    record_batch::{RecordBatch, RecordBatchOptions},
};
use log::{debug, warn};
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

pub mod grouping;

pub use grouping::{GroupingAggregationOperator, GroupingAggregationOperatorFactory};

/// Check every aggregator factory of an operator runs in the operator's mode.
pub(crate) fn check_modes(
    mode: AggregatorMode,
    modes: impl IntoIterator<Item = AggregatorMode>,
    describe: impl Fn(usize) -> String,
) -> Result<()> {
    match modes.into_iter().position(|m| m != mode) {
        None => Ok(()),
        Some(index) => Err(AggregationError::InvalidConfig(format!(
            "aggregator {index} ({}) does not run in operator mode {mode}",
            describe(index)
        ))),
    }
}

/// Builds [`AggregationOperator`]s running the same aggregators in the same mode.
#[derive(Debug, Clone)]
pub struct AggregationOperatorFactory {
    mode: AggregatorMode,
    aggregators: Vec<AggregatorFactory>,
}

impl AggregationOperatorFactory {
    /// # Errors
    /// Every aggregator factory must run in `mode`.
    pub fn new(mode: AggregatorMode, aggregators: Vec<AggregatorFactory>) -> Result<Self> {
        check_modes(mode, aggregators.iter().map(AggregatorFactory::mode), |i| {
            aggregators[i].describe()
        })?;
        Ok(Self { mode, aggregators })
    }

    #[must_use]
    pub fn mode(&self) -> AggregatorMode {
        self.mode
    }

    #[must_use]
    pub fn get(&self) -> AggregationOperator {
        AggregationOperator::new(self.aggregators.iter().map(AggregatorFactory::get).collect())
    }

    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "AggregationOperator[mode = {}, aggs = {}]",
            self.mode,
            self.aggregators
                .iter()
                .map(AggregatorFactory::describe)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// Ungrouped aggregation: every aggregator folds every batch, and finishing yields one
/// batch with a single row.
#[derive(Debug)]
pub struct AggregationOperator {
    aggregators: Vec<Aggregator>,
    finished: bool,
    failure: Option<String>,
    output: Option<RecordBatch>,
}

impl AggregationOperator {
    #[must_use]
    pub fn new(aggregators: Vec<Aggregator>) -> Self {
        Self {
            aggregators,
            finished: false,
            failure: None,
            output: None,
        }
    }

    #[must_use]
    pub fn aggregators(&self) -> &[Aggregator] {
        &self.aggregators
    }

    #[must_use]
    pub fn needs_input(&self) -> bool {
        !self.finished && self.failure.is_none()
    }

    fn check_usable(&self) -> Result<()> {
        match &self.failure {
            Some(cause) => Err(AggregationError::OperatorFailed(cause.clone())),
            None => Ok(()),
        }
    }

    /// Feed `batch` to every aggregator in order. If an aggregator fails, those before it
    /// have already folded the batch, so the operator refuses any further work.
    ///
    /// # Errors
    /// [`AggregationError::OperatorFinished`] once [`AggregationOperator::finish`] has
    /// been called, [`AggregationError::OperatorFailed`] after an earlier failure,
    /// otherwise any error an aggregator raises.
    pub fn add_input(&mut self, batch: &RecordBatch) -> Result<()> {
        if self.finished {
            return Err(AggregationError::OperatorFinished);
        }
        self.check_usable()?;
        let result = self
            .aggregators
            .iter_mut()
            .try_for_each(|aggregator| aggregator.process_batch(batch));
        if let Err(e) = &result {
            warn!("{self} failed on input: {e}");
            self.failure = Some(e.to_string());
        }
        result
    }

    /// Signal end of input and evaluate every aggregator exactly once. Further calls
    /// do nothing.
    ///
    /// # Errors
    /// [`AggregationError::OperatorFailed`] after an earlier failure, or if the output
    /// batch cannot be assembled.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.check_usable()?;
        let fields = self
            .aggregators
            .iter()
            .map(Aggregator::output_field)
            .collect::<Vec<_>>();
        let columns = self
            .aggregators
            .iter()
            .map(Aggregator::evaluate)
            .collect::<Result<Vec<_>>>()?;
        let batch = RecordBatch::try_new_with_options(
            Arc::new(Schema::new(fields)),
            columns,
            &RecordBatchOptions::new().with_row_count(Some(1)),
        )?;
        debug!("{self} finished with {} output columns", batch.num_columns());
        self.output = Some(batch);
        self.finished = true;
        Ok(())
    }

    /// True once finished and the output has been taken.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished && self.output.is_none()
    }

    /// The result batch. `Some` exactly once after [`AggregationOperator::finish`].
    pub fn get_output(&mut self) -> Option<RecordBatch> {
        self.output.take()
    }
}

impl Display for AggregationOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AggregationOperator[aggregators=[{}]]",
            self.aggregators
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
