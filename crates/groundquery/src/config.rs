//! Inference configuration.
//!
//! Loaded from TOML, looked up in:
//! - the file named by the `GROUNDQUERY_CONFIG` environment variable
//! - `groundquery.toml` in the current directory

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use groundquery_lp::{EnginePool, SolveLimits, DEFAULT_POOL_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "GROUNDQUERY_CONFIG";

/// Configuration file looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "groundquery.toml";

/// How a query tree is decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStrategy {
    /// One ILP (or LP relaxation) over the whole tree
    #[default]
    Ilp,
    /// Subgradient reparameterization followed by local decoding
    DualDecomposition,
}

/// Configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Default decoding strategy
    pub strategy: InferenceStrategy,

    /// Dual decomposition settings
    pub dual_decomposition: DualDecompositionConfig,

    /// ILP settings
    pub ilp: IlpConfig,

    /// Solver engine pool settings
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualDecompositionConfig {
    /// Iteration budget per tree node
    pub max_iterations: usize,
}

impl Default for DualDecompositionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IlpConfig {
    /// Solve the LP relaxation and round
    pub use_lp_relaxation: bool,

    /// Require determiners to select exactly one output
    pub apply_weak_supervision_constraints: bool,

    /// Wall-clock limit per solve, in milliseconds
    pub time_limit_ms: Option<u64>,

    /// Branch-and-bound node limit per solve
    pub node_limit: Option<usize>,
}

impl Default for IlpConfig {
    fn default() -> Self {
        Self {
            use_lp_relaxation: false,
            apply_weak_supervision_constraints: true,
            time_limit_ms: None,
            node_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of solver engines, i.e. the maximum number of concurrent solves
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
        }
    }
}

impl InferenceConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| QueryError::Config(format!("invalid configuration: {}", e)))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| QueryError::Config(format!("failed to serialize configuration: {}", e)))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            QueryError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml_string()?;
        fs::write(path, content)
            .map_err(|e| QueryError::Config(format!("failed to write {}: {}", path.display(), e)))
    }

    /// Find and load configuration file, falling back to defaults.
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if let Ok(config) = Self::load(Path::new(&path)) {
                return config;
            }
        }

        let current = PathBuf::from(CONFIG_FILE_NAME);
        if current.exists() {
            if let Ok(config) = Self::load(&current) {
                return config;
            }
        }

        Self::default()
    }

    pub fn solve_limits(&self) -> SolveLimits {
        let mut limits = SolveLimits::default();
        if let Some(ms) = self.ilp.time_limit_ms {
            limits = limits.with_time_limit(Duration::from_millis(ms));
        }
        if let Some(nodes) = self.ilp.node_limit {
            limits = limits.with_node_limit(nodes);
        }
        limits
    }

    /// The engine pool for this configuration. Build it once at startup and
    /// share it between threads.
    pub fn build_pool(&self) -> EnginePool {
        EnginePool::new(self.pool.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InferenceConfig::default();
        assert_eq!(config.strategy, InferenceStrategy::Ilp);
        assert_eq!(config.dual_decomposition.max_iterations, 1000);
        assert!(!config.ilp.use_lp_relaxation);
        assert!(config.ilp.apply_weak_supervision_constraints);
        assert_eq!(config.pool.size, 20);
        assert_eq!(config.solve_limits(), SolveLimits::default());
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut config = InferenceConfig::default();
        config.strategy = InferenceStrategy::DualDecomposition;
        config.ilp.node_limit = Some(50);
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("strategy = \"dual_decomposition\""));
        let deserialized = InferenceConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = InferenceConfig::from_toml_str(
            r#"
            [ilp]
            time_limit_ms = 250

            [pool]
            size = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.strategy, InferenceStrategy::Ilp);
        assert_eq!(config.pool.size, 4);
        assert_eq!(config.build_pool().capacity(), 4);
        assert_eq!(
            config.solve_limits().time_limit,
            Some(Duration::from_millis(250))
        );
        assert!(config.ilp.apply_weak_supervision_constraints);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        assert!(matches!(
            InferenceConfig::from_toml_str("strategy = \"gibbs\""),
            Err(QueryError::Config(_))
        ));
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = InferenceConfig::default();
        config.dual_decomposition.max_iterations = 25;
        config.save(&path).unwrap();
        assert_eq!(InferenceConfig::load(&path).unwrap(), config);
        assert!(matches!(
            InferenceConfig::load(&dir.path().join("missing.toml")),
            Err(QueryError::Config(_))
        ));
    }
}
