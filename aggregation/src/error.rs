//! Errors raised by the aggregation engine.
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
use arrow::{datatypes::DataType, error::ArrowError};
use datafusion::error::DataFusionError;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = AggregationError> = std::result::Result<T, E>;

/// Everything that can go wrong while aggregating. None of these are retried
/// internally, they are handed back to the driver.
#[derive(Error, Debug)]
pub enum AggregationError {
    /// A growable array could not reserve memory from the budget. Nothing was
    /// reserved and the array kept its previous capacity.
    #[error("memory limit exceeded growing {consumer} by {requested} bytes: {source}")]
    MemoryLimitExceeded {
        consumer: String,
        requested: usize,
        source: DataFusionError,
    },
    /// The input columns do not have the shape the aggregator mode expects, e.g. raw
    /// values handed to an aggregator that reads partial state.
    #[error("{function} reading {reading} expected {expected} on channel {channel}, found {found}")]
    InvalidModeTransition {
        function: String,
        reading: &'static str,
        channel: usize,
        expected: DataType,
        found: DataType,
    },
    #[error("{function} reading {reading} expects {expected} input channel(s), found {found}")]
    InvalidChannels {
        function: String,
        reading: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("channel {channel} is out of bounds for a batch with {columns} column(s)")]
    ChannelOutOfBounds { channel: usize, columns: usize },
    #[error("invalid group id at row {row}: {reason}")]
    InvalidGroupId { row: usize, reason: String },
    #[error("cannot merge {from} into {into}")]
    IncompatibleMerge { into: String, from: String },
    #[error("{function} overflowed")]
    ArithmeticOverflow { function: String },
    #[error("operator has already finished and accepts no more input")]
    OperatorFinished,
    /// An earlier call failed part way through folding a batch, so the aggregators no
    /// longer agree on which rows they hold. The operator can only be closed.
    #[error("operator failed earlier and accepts no more work: {0}")]
    OperatorFailed(String),
    #[error("invalid aggregation configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}
