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
use std::fmt::{Display, Formatter};

/// Selects where an aggregator reads its input from and what it emits.
///
/// | Mode           | Reads         | Emits         |
/// |----------------|---------------|---------------|
/// | `Single`       | raw values    | final result  |
/// | `Initial`      | raw values    | partial state |
/// | `Intermediate` | partial state | partial state |
/// | `Final`        | partial state | final result  |
///
/// The mode is fixed when an aggregator is built and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregatorMode {
    Single,
    Initial,
    Intermediate,
    Final,
}

impl AggregatorMode {
    /// Does this mode consume partial state rather than raw values?
    #[must_use]
    pub fn is_input_partial(self) -> bool {
        matches!(self, Self::Intermediate | Self::Final)
    }

    /// Does this mode produce partial state rather than a final result?
    #[must_use]
    pub fn is_output_partial(self) -> bool {
        matches!(self, Self::Initial | Self::Intermediate)
    }
}

impl Display for AggregatorMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Single => "SINGLE",
            Self::Initial => "INITIAL",
            Self::Intermediate => "INTERMEDIATE",
            Self::Final => "FINAL",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::AggregatorMode;

    #[test]
    fn should_read_partial_input_only_in_intermediate_and_final() {
        assert!(!AggregatorMode::Single.is_input_partial());
        assert!(!AggregatorMode::Initial.is_input_partial());
        assert!(AggregatorMode::Intermediate.is_input_partial());
        assert!(AggregatorMode::Final.is_input_partial());
    }

    #[test]
    fn should_write_partial_output_only_in_initial_and_intermediate() {
        assert!(!AggregatorMode::Single.is_output_partial());
        assert!(AggregatorMode::Initial.is_output_partial());
        assert!(AggregatorMode::Intermediate.is_output_partial());
        assert!(!AggregatorMode::Final.is_output_partial());
    }

    #[test]
    fn should_display_upper_case_names() {
        assert_eq!(
            [
                AggregatorMode::Single,
                AggregatorMode::Initial,
                AggregatorMode::Intermediate,
                AggregatorMode::Final
            ]
            .map(|mode| mode.to_string()),
            ["SINGLE", "INITIAL", "INTERMEDIATE", "FINAL"]
        );
    }
}
