//! claimgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default cap on emitted allocation requests when the query names none.
const DEFAULT_CANDIDATE_LIMIT: usize = 1000;

/// Hard server-side cap; query limits above this are clamped.
const MAX_CANDIDATE_LIMIT: usize = 10_000;

/// Default candidate-enumeration deadline in milliseconds.
const DEFAULT_DEADLINE_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridConfig {
    pub store: Option<StoreConfig>,
    pub solver: Option<SolverConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the redb database file.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverConfig {
    pub default_limit: Option<usize>,
    pub max_limit: Option<usize>,
    pub deadline_ms: Option<u64>,
}

/// Resolved solver settings with all defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    /// Cap applied when the query carries no `limit`.
    pub default_limit: usize,
    /// Server-side cap applied over any query `limit`.
    pub max_limit: usize,
    /// Enumeration deadline; exceeding it aborts with a timeout error.
    pub deadline: Duration,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_CANDIDATE_LIMIT,
            max_limit: MAX_CANDIDATE_LIMIT,
            deadline: Duration::from_millis(DEFAULT_DEADLINE_MS),
        }
    }
}

impl SolverSettings {
    /// Effective cap for a query that requested `limit`.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) => n.min(self.max_limit),
            None => self.default_limit,
        }
    }
}

impl GridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve solver settings, filling unset fields with defaults.
    pub fn solver_settings(&self) -> SolverSettings {
        let defaults = SolverSettings::default();
        let solver = self.solver.clone().unwrap_or_default();
        SolverSettings {
            default_limit: solver.default_limit.unwrap_or(defaults.default_limit),
            max_limit: solver.max_limit.unwrap_or(defaults.max_limit),
            deadline: solver
                .deadline_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.deadline),
        }
    }
}
