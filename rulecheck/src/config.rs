//! Configuration types for controlling runs, generation budgets and shrinking.

use crate::choice::DEFAULT_MAX_CHOICES;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid max_examples: {0} (must be > 0)")]
    InvalidMaxExamples(usize),
    #[error("invalid step bounds: min_steps {min} > max_steps {max}")]
    InvalidStepBounds { min: usize, max: usize },
    #[error("invalid max_steps: {0} (must be > 0)")]
    InvalidMaxSteps(usize),
    #[error("invalid max_shrinks: {0} (must be > 0)")]
    InvalidMaxShrinks(usize),
    #[error("invalid timeout (must be > 0)")]
    InvalidTimeout,
    #[error("invalid max_choices: {0} (must be > 0)")]
    InvalidMaxChoices(usize),
    #[error("invalid worker count: {0} (must be > 0)")]
    InvalidWorkers(usize),
    #[error("environment variable {var} has unparseable value {value:?}")]
    Env { var: &'static str, value: String },
}

/// Configuration for one stateful test run
#[derive(Debug, Clone, PartialEq)]
pub struct TestConfig {
    /// Number of valid examples to generate
    pub max_examples: usize,
    /// Steps every sequence runs before the continuation flag is consulted
    pub min_steps: usize,
    /// Hard upper bound on steps per sequence
    pub max_steps: usize,
    /// Expected number of steps once `min_steps` is reached
    pub avg_steps: usize,
    /// Maximum number of candidate executions while shrinking
    pub max_shrinks: usize,
    /// Wall-clock budget for shrinking
    pub shrink_timeout: Duration,
    /// Wall-clock budget for generation; sequences running past it are aborted
    pub run_timeout: Option<Duration>,
    /// Optional seed for reproducible runs
    pub seed: Option<u64>,
    /// Upper bound on choices consumed by one example
    pub max_choices: usize,
    /// Threads exploring independent examples
    pub workers: usize,
    /// Replay and store failures through the example database
    pub use_database: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            max_examples: 100,
            min_steps: 0,
            max_steps: 50,
            avg_steps: 10,
            max_shrinks: 2000,
            shrink_timeout: Duration::from_secs(10),
            run_timeout: None,
            seed: None,
            max_choices: DEFAULT_MAX_CHOICES,
            workers: 1,
            use_database: true,
        }
    }
}

impl TestConfig {
    /// Create a configuration inheriting the thread's global defaults
    pub fn new() -> Self {
        get_global_config().test_defaults()
    }

    /// Validate the test configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_examples == 0 {
            return Err(ConfigError::InvalidMaxExamples(self.max_examples));
        }
        if self.max_steps == 0 {
            return Err(ConfigError::InvalidMaxSteps(self.max_steps));
        }
        if self.min_steps > self.max_steps {
            return Err(ConfigError::InvalidStepBounds {
                min: self.min_steps,
                max: self.max_steps,
            });
        }
        if self.max_shrinks == 0 {
            return Err(ConfigError::InvalidMaxShrinks(self.max_shrinks));
        }
        if self.shrink_timeout.is_zero() || self.run_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.max_choices == 0 {
            return Err(ConfigError::InvalidMaxChoices(self.max_choices));
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }
        Ok(())
    }

    /// Probability of taking another step once `min_steps` have run
    pub fn continue_probability(&self) -> f64 {
        1.0 - 1.0 / self.avg_steps.max(1) as f64
    }

    /// Number of discarded examples tolerated before generation is declared unsatisfiable
    pub fn max_invalid(&self) -> usize {
        self.max_examples.saturating_mul(10)
    }

    pub fn with_max_examples(mut self, max_examples: usize) -> Self {
        self.max_examples = max_examples;
        self
    }

    pub fn with_steps(mut self, min_steps: usize, max_steps: usize) -> Self {
        self.min_steps = min_steps;
        self.max_steps = max_steps;
        self
    }

    pub fn with_avg_steps(mut self, avg_steps: usize) -> Self {
        self.avg_steps = avg_steps;
        self
    }

    pub fn with_max_shrinks(mut self, max_shrinks: usize) -> Self {
        self.max_shrinks = max_shrinks;
        self
    }

    pub fn with_shrink_timeout(mut self, timeout: Duration) -> Self {
        self.shrink_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_choices(mut self, max_choices: usize) -> Self {
        self.max_choices = max_choices;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// One worker per available CPU
    pub fn parallel(self) -> Self {
        self.with_workers(num_cpus::get())
    }

    pub fn without_database(mut self) -> Self {
        self.use_database = false;
        self
    }

    /// Overlay `RULECHECK_*` environment variables on this configuration
    ///
    /// Recognized: `RULECHECK_SEED`, `RULECHECK_MAX_EXAMPLES`,
    /// `RULECHECK_MAX_STEPS` and `RULECHECK_WORKERS`.
    pub fn from_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(
            var: &'static str,
            raw: Option<String>,
        ) -> Result<Option<T>, ConfigError> {
            match raw {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::Env { var, value }),
            }
        }

        if let Some(seed) = parse("RULECHECK_SEED", lookup("RULECHECK_SEED"))? {
            self.seed = Some(seed);
        }
        if let Some(n) = parse("RULECHECK_MAX_EXAMPLES", lookup("RULECHECK_MAX_EXAMPLES"))? {
            self.max_examples = n;
        }
        if let Some(n) = parse("RULECHECK_MAX_STEPS", lookup("RULECHECK_MAX_STEPS"))? {
            self.max_steps = n;
        }
        if let Some(n) = parse("RULECHECK_WORKERS", lookup("RULECHECK_WORKERS"))? {
            self.workers = n;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Defaults applied to every [`TestConfig::new`] on the current thread
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalConfig {
    pub max_examples: usize,
    pub max_steps: usize,
    pub seed: Option<u64>,
    pub workers: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        let defaults = TestConfig::default();
        Self {
            max_examples: defaults.max_examples,
            max_steps: defaults.max_steps,
            seed: defaults.seed,
            workers: defaults.workers,
        }
    }
}

impl GlobalConfig {
    /// Validate the global configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.test_defaults().validate()
    }

    fn test_defaults(&self) -> TestConfig {
        TestConfig {
            max_examples: self.max_examples,
            max_steps: self.max_steps,
            seed: self.seed,
            workers: self.workers,
            ..TestConfig::default()
        }
    }
}

// Thread-local so that tests running in parallel do not see each other's defaults.
thread_local! {
    static GLOBAL_CONFIG: std::cell::RefCell<GlobalConfig> = std::cell::RefCell::new(GlobalConfig::default());
}

/// Get the current global configuration
pub fn get_global_config() -> GlobalConfig {
    GLOBAL_CONFIG.with(|config| config.borrow().clone())
}

/// Set the global configuration
pub fn set_global_config(config: GlobalConfig) -> Result<(), ConfigError> {
    config.validate()?;
    GLOBAL_CONFIG.with(|current| *current.borrow_mut() = config);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = TestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_examples, 100);
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.max_invalid(), 1000);
    }

    #[test]
    fn test_config_validation() {
        let config = TestConfig::default().with_max_examples(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxExamples(0)));

        let config = TestConfig::default().with_steps(10, 5);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidStepBounds { min: 10, max: 5 })
        );

        let config = TestConfig::default().with_shrink_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeout));

        let config = TestConfig::default().with_workers(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidWorkers(0)));
    }

    #[test]
    fn test_continue_probability() {
        let config = TestConfig::default().with_avg_steps(4);
        assert!((config.continue_probability() - 0.75).abs() < 1e-9);

        let config = TestConfig::default().with_avg_steps(0);
        assert_eq!(config.continue_probability(), 0.0);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("RULECHECK_SEED", "42"), ("RULECHECK_MAX_STEPS", " 7 ")]
            .into_iter()
            .collect();
        let config = TestConfig::default()
            .with_overrides(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.max_steps, 7);
        assert_eq!(config.max_examples, 100);
    }

    #[test]
    fn test_env_override_errors() {
        let result = TestConfig::default().with_overrides(|var| {
            (var == "RULECHECK_WORKERS").then(|| "many".to_string())
        });
        assert_eq!(
            result,
            Err(ConfigError::Env {
                var: "RULECHECK_WORKERS",
                value: "many".to_string()
            })
        );
    }

    #[test]
    fn test_global_config_roundtrip() {
        let global = GlobalConfig {
            max_examples: 25,
            seed: Some(3),
            ..GlobalConfig::default()
        };
        set_global_config(global.clone()).unwrap();
        assert_eq!(get_global_config(), global);

        let config = TestConfig::new();
        assert_eq!(config.max_examples, 25);
        assert_eq!(config.seed, Some(3));

        let invalid = GlobalConfig {
            max_examples: 0,
            ..GlobalConfig::default()
        };
        assert!(set_global_config(invalid).is_err());
        assert_eq!(get_global_config(), global);
    }
}
