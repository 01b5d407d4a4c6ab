// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Observation type taxonomy.
//!
//! The compression agent classifies every observation into one of a fixed
//! set of kinds. The set is closed because the storage schema constrains it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of development activity an observation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    /// An architectural or design decision.
    Decision,
    /// A defect was found and fixed.
    Bugfix,
    /// New functionality was added.
    Feature,
    /// Code was restructured without behavior change.
    Refactor,
    /// Something was learned about the codebase.
    #[default]
    Discovery,
    /// Any other modification.
    Change,
}

impl ObservationType {
    /// All observation types, in display order.
    pub fn all() -> [ObservationType; 6] {
        [
            ObservationType::Decision,
            ObservationType::Bugfix,
            ObservationType::Feature,
            ObservationType::Refactor,
            ObservationType::Discovery,
            ObservationType::Change,
        ]
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::Decision => "decision",
            ObservationType::Bugfix => "bugfix",
            ObservationType::Feature => "feature",
            ObservationType::Refactor => "refactor",
            ObservationType::Discovery => "discovery",
            ObservationType::Change => "change",
        }
    }
}

impl fmt::Display for ObservationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObservationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "decision" => Ok(ObservationType::Decision),
            "bugfix" | "bug_fix" => Ok(ObservationType::Bugfix),
            "feature" => Ok(ObservationType::Feature),
            "refactor" | "refactoring" => Ok(ObservationType::Refactor),
            "discovery" => Ok(ObservationType::Discovery),
            "change" => Ok(ObservationType::Change),
            other => Err(format!("unknown observation type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_accepts_aliases() {
        assert_eq!(
            "bug_fix".parse::<ObservationType>().unwrap(),
            ObservationType::Bugfix
        );
        assert_eq!(
            " Refactoring ".parse::<ObservationType>().unwrap(),
            ObservationType::Refactor
        );
        assert!("nonsense".parse::<ObservationType>().is_err());
    }

    #[test]
    fn test_storage_names_parse_back() {
        for kind in ObservationType::all() {
            assert_eq!(kind.as_str().parse::<ObservationType>().unwrap(), kind);
        }
    }
}
