//! Configuration sections consumed by the analysis core.
//!
//! A configuration is a JSON object with one entry per section, e.g.
//!
//! ```json
//! {
//!   "AbstractionRefiner": { "dump-path-formula": true },
//!   "ControlAnalysis": { "aggregate-atomic-transitions": false }
//! }
//! ```
//!
//! Missing sections and missing keys take their defaults; unknown keys are
//! rejected.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AnalysisResult;

fn from_section<T: DeserializeOwned + Default>(config: &Value, section: &str) -> AnalysisResult<T> {
    match config.get(section) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => Ok(T::deserialize(value)?),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AbstractionRefinerConfig {
    /// Incremental (lazy) abstraction. Not supported; refinement fails when set.
    pub use_lazy_abstraction: bool,
    /// Write every checked path formula to `dump_directory`.
    pub dump_path_formula: bool,
    pub dump_directory: PathBuf,
}

impl Default for AbstractionRefinerConfig {
    fn default() -> Self {
        AbstractionRefinerConfig {
            use_lazy_abstraction: false,
            dump_path_formula: false,
            dump_directory: PathBuf::from("output"),
        }
    }
}

impl AbstractionRefinerConfig {
    pub const SECTION: &'static str = "AbstractionRefiner";

    pub fn from_section(config: &Value) -> AnalysisResult<Self> {
        from_section(config, Self::SECTION)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ControlAnalysisConfig {
    /// Merge consecutive atomic steps into one transition. Not supported.
    pub aggregate_atomic_transitions: bool,
}

impl ControlAnalysisConfig {
    pub const SECTION: &'static str = "ControlAnalysis";

    pub fn from_section(config: &Value) -> AnalysisResult<Self> {
        from_section(config, Self::SECTION)
    }
}
