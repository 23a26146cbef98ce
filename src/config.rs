//! Search configuration
//!
//! All probabilities, limits and timeouts the engine consults live here. The
//! defaults are the ones the search was tuned with; embedders typically load
//! a partial JSON document and let every missing key fall back to its default.
//!
//! ```rust
//! use suitegen::config::SearchConfig;
//!
//! let config = SearchConfig::from_json_str(r#"{ "factory": { "null_probability": 0.0 } }"#).unwrap();
//! assert_eq!(config.factory.null_probability, 0.0);
//! assert_eq!(config.mutation.chromosome_length, 40);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Test synthesis: variable reuse, recursion and literal generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Probability of using `null` for a nullable parameter
    pub null_probability: f64,

    /// Probability of reusing an existing object instead of generating one
    pub object_reuse_probability: f64,

    /// Probability of reusing an existing primitive or string
    pub primitive_reuse_probability: f64,

    /// Maximum nesting of generator calls while satisfying dependencies
    pub max_recursion: usize,

    /// Maximum redraws when mutating a literal into a different value
    pub max_attempts: usize,

    /// Maximum length of generated arrays
    pub max_array: usize,

    /// Typical length of generated strings
    pub string_length: usize,

    /// Hard limit on string length
    pub max_string: usize,

    /// Bound of the uniform range random integers are drawn from
    pub max_int: i64,

    /// Scale of delta mutations on numbers
    pub max_delta: i64,

    /// Probability of re-randomizing a literal instead of nudging it
    pub random_perturbation: f64,

    /// Probability of inserting a call on the unit under test (otherwise a
    /// call on an existing object)
    pub insertion_uut: f64,

    /// Probability of changing the parameters of a call during mutation
    pub p_change_parameter: f64,

    /// Maximum depth of composite references (`a[0].f[1]...`)
    pub max_reference_chain: usize,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            null_probability: 0.1,
            object_reuse_probability: 0.9,
            primitive_reuse_probability: 0.5,
            max_recursion: 10,
            max_attempts: 1000,
            max_array: 10,
            string_length: 20,
            max_string: 1000,
            max_int: 2048,
            max_delta: 20,
            random_perturbation: 0.2,
            insertion_uut: 0.5,
            p_change_parameter: 0.1,
            max_reference_chain: 8,
        }
    }
}

/// Chromosome-level mutation and crossover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    pub chromosome_length: usize,

    /// Decay base of the insertion loop: the n-th insertion happens with
    /// probability `p_statement_insertion^n`
    pub p_statement_insertion: f64,

    pub p_test_delete: f64,
    pub p_test_change: f64,
    pub p_test_insert: f64,

    pub crossover_rate: f64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            chromosome_length: 40,
            p_statement_insertion: 0.5,
            p_test_delete: 1.0 / 3.0,
            p_test_change: 1.0 / 3.0,
            p_test_insert: 1.0 / 3.0,
            crossover_rate: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSearchConfig {
    /// Random call/parameter changes tried on a reference statement
    pub local_search_probes: usize,

    /// Decimal digits explored by floating point search
    pub float_precision_digits: u32,

    /// Upper bound on fitness evaluations per local search run
    pub max_evaluations: usize,

    /// Inclusive character range tried by string search
    pub char_range: (u32, u32),
}

impl Default for LocalSearchConfig {
    fn default() -> Self {
        Self {
            local_search_probes: 10,
            float_precision_digits: 7,
            max_evaluations: 10_000,
            char_range: (32, 126),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Wall-clock budget for one test case execution
    pub timeout_ms: u64,

    /// Grace period for a cancelled execution to stop on its own
    pub shutdown_timeout_ms: u64,
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            shutdown_timeout_ms: 1000,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub factory: FactoryConfig,
    pub mutation: MutationConfig,
    pub local_search: LocalSearchConfig,
    pub executor: ExecutorConfig,
}

fn check_probability(field: &'static str, value: f64) -> ConfigResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a probability, got {}", value),
        })
    }
}

fn check_positive(field: &'static str, value: usize) -> ConfigResult<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: "must be positive".to_string(),
        })
    }
}

impl SearchConfig {
    /// Parse a (possibly partial) JSON document and validate it.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: SearchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a (possibly partial) JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let factory = &self.factory;
        check_probability("factory.null_probability", factory.null_probability)?;
        check_probability("factory.object_reuse_probability", factory.object_reuse_probability)?;
        check_probability("factory.primitive_reuse_probability", factory.primitive_reuse_probability)?;
        check_probability("factory.random_perturbation", factory.random_perturbation)?;
        check_probability("factory.insertion_uut", factory.insertion_uut)?;
        check_probability("factory.p_change_parameter", factory.p_change_parameter)?;
        check_positive("factory.max_recursion", factory.max_recursion)?;
        check_positive("factory.max_attempts", factory.max_attempts)?;
        check_positive("factory.max_reference_chain", factory.max_reference_chain)?;
        if factory.max_int <= 0 {
            return Err(ConfigError::Invalid {
                field: "factory.max_int",
                reason: "must be positive".to_string(),
            });
        }
        if factory.string_length > factory.max_string {
            return Err(ConfigError::Invalid {
                field: "factory.string_length",
                reason: format!("exceeds max_string ({})", factory.max_string),
            });
        }

        let mutation = &self.mutation;
        check_positive("mutation.chromosome_length", mutation.chromosome_length)?;
        check_probability("mutation.p_statement_insertion", mutation.p_statement_insertion)?;
        check_probability("mutation.p_test_delete", mutation.p_test_delete)?;
        check_probability("mutation.p_test_change", mutation.p_test_change)?;
        check_probability("mutation.p_test_insert", mutation.p_test_insert)?;
        check_probability("mutation.crossover_rate", mutation.crossover_rate)?;

        let (low, high) = self.local_search.char_range;
        if low > high || char::from_u32(low).is_none() || char::from_u32(high).is_none() {
            return Err(ConfigError::Invalid {
                field: "local_search.char_range",
                reason: format!("{}..={} is not a valid character range", low, high),
            });
        }
        check_positive("local_search.max_evaluations", self.local_search.max_evaluations)?;

        if self.executor.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "executor.timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SearchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.factory.max_int, 2048);
        assert_eq!(config.executor.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_documents_fall_back_to_defaults() {
        let config = SearchConfig::from_json_str(r#"{"mutation": {"chromosome_length": 12}}"#).unwrap();
        assert_eq!(config.mutation.chromosome_length, 12);
        assert_eq!(config.mutation.crossover_rate, 0.75);
        assert_eq!(config.factory, FactoryConfig::default());
    }

    #[test]
    fn test_rejects_bad_probability() {
        let err = SearchConfig::from_json_str(r#"{"factory": {"null_probability": 1.5}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "factory.null_probability", .. }));
        assert!(matches!(
            SearchConfig::from_json_str("{not json").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_round_trip_through_file() {
        let mut config = SearchConfig::default();
        config.executor.timeout_ms = 250;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json_string().unwrap().as_bytes()).unwrap();
        assert_eq!(SearchConfig::from_path(file.path()).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SearchConfig::from_path(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
