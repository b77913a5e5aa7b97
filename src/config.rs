//! Engine configuration.
//!
//! Every section is optional in JSON; missing keys take their defaults.
//!
//! ```json
//! {
//!   "parser": { "max_depth": 10 },
//!   "optimizer": { "max_parallel_ops": 8, "merge_stages": true },
//!   "matcher": { "max_results_per_pattern": 10000, "max_var_length_hops": 10 },
//!   "transaction": { "timeout_ms": 5000, "auto_rollback": true },
//!   "diff": { "ignore_fields": ["_version", "_updatedAt"] },
//!   "projector": { "flatten_max_depth": 5, "cache_accessors": true }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::diff::DiffConfig;
use crate::pattern::MatcherConfig;
use crate::planner::OptimizerConfig;
use crate::projection::ProjectorConfig;
use crate::query::ParserConfig;
use crate::tx::TransactionConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parser: ParserConfig,
    pub optimizer: OptimizerConfig,
    pub matcher: MatcherConfig,
    pub transaction: TransactionConfig,
    pub diff: DiffConfig,
    pub projector: ProjectorConfig,
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json_str(r#"{"transaction": {"timeout_ms": 250}, "parser": {}}"#).unwrap();
        assert_eq!(config.transaction.timeout_ms, 250);
        assert!(config.transaction.auto_rollback);
        assert_eq!(config.parser.max_depth, 10);
        assert_eq!(config.optimizer.max_parallel_ops, 8);
        assert_eq!(config.projector.flatten_max_depth, 5);
    }

    #[test]
    fn test_round_trip_and_errors() {
        let config = EngineConfig::default();
        let text = config.to_json_string().unwrap();
        assert_eq!(EngineConfig::from_json_str(&text).unwrap(), config);
        assert!(matches!(EngineConfig::from_json_str("{\"parser\": 3}"), Err(Error::InvalidConfig(_))));
    }
}
