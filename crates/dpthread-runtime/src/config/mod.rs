//! dpthread Configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. User's dpt_config.rs (compile-time, via `DPT_CONFIG_RS`)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use dpthread_runtime::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_env()
//!     .num_cores(8)
//!     .min_poll(Duration::from_micros(20));
//! ```

pub mod defaults;

use dpthread_core::constants::MAX_CORES;
use dpthread_core::env::{env_get, env_get_bool, env_get_us};
use dpthread_core::{kprintln, SchedError};
use std::time::Duration;

/// Scheduler configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of kthreads (dedicated cores)
    pub num_cores: usize,
    /// Maximum live green threads
    pub max_threads: usize,
    /// Usable stack bytes per green thread
    pub stack_size: usize,
    /// Guard region below each stack
    pub guard_size: usize,
    /// Bounded run queue capacity per core (power of two)
    pub rq_capacity: usize,
    /// Softirq budget when serving the local core
    pub softirq_local_budget: u32,
    /// Softirq budget when serving a remote core during a steal
    pub softirq_remote_budget: u32,
    /// Empty scheduler loop iterations before parking
    pub poll_iters: u32,
    /// Minimum time to busy-poll before parking
    pub min_poll: Duration,
    /// Force local softirq servicing at least this often
    pub watchdog_interval: Duration,
    pub disable_watchdog: bool,
    /// Sampled counter refresh interval
    pub pmc_interval: Duration,
    /// Upper bound on a single park; parked cores re-check shutdown
    pub park_timeout: Duration,
    /// Released stacks kept for reuse
    pub stack_cache: usize,
    /// Pin kthread N to CPU N
    pub pin_cores: bool,
    pub debug_logging: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SchedulerConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `DPT_NUM_CORES` - Number of kthreads
    /// - `DPT_MAX_THREADS` - Max live green threads
    /// - `DPT_STACK_SIZE` / `DPT_GUARD_SIZE` - Stack geometry in bytes
    /// - `DPT_RQ_SIZE` - Run queue capacity
    /// - `DPT_SOFTIRQ_LOCAL_BUDGET` / `DPT_SOFTIRQ_REMOTE_BUDGET`
    /// - `DPT_POLL_ITERS` - Empty loop iterations before parking
    /// - `DPT_MIN_POLL_US` - Minimum busy-poll time
    /// - `DPT_WATCHDOG_US` - Softirq watchdog interval
    /// - `DPT_DISABLE_WATCHDOG` - Turn the watchdog off (0/1)
    /// - `DPT_PMC_US` - Sampled counter interval
    /// - `DPT_PARK_TIMEOUT_MS` - Park timeout
    /// - `DPT_STACK_CACHE` - Cached stacks
    /// - `DPT_PIN_CORES` - Pin kthreads to CPUs (0/1)
    /// - `DPT_DEBUG` - Enable debug logging (0/1)
    pub fn from_env() -> Self {
        Self {
            num_cores: env_get("DPT_NUM_CORES", defaults::NUM_CORES),
            max_threads: env_get("DPT_MAX_THREADS", defaults::MAX_THREADS),
            stack_size: env_get("DPT_STACK_SIZE", defaults::STACK_SIZE),
            guard_size: env_get("DPT_GUARD_SIZE", defaults::GUARD_SIZE),
            rq_capacity: env_get("DPT_RQ_SIZE", defaults::RQ_SIZE),
            softirq_local_budget: env_get(
                "DPT_SOFTIRQ_LOCAL_BUDGET",
                defaults::SOFTIRQ_LOCAL_BUDGET,
            ),
            softirq_remote_budget: env_get(
                "DPT_SOFTIRQ_REMOTE_BUDGET",
                defaults::SOFTIRQ_REMOTE_BUDGET,
            ),
            poll_iters: env_get("DPT_POLL_ITERS", defaults::SCHED_POLL_ITERS),
            min_poll: env_get_us("DPT_MIN_POLL_US", defaults::SCHED_MIN_POLL_US),
            watchdog_interval: env_get_us("DPT_WATCHDOG_US", defaults::WATCHDOG_US),
            disable_watchdog: env_get_bool("DPT_DISABLE_WATCHDOG", defaults::DISABLE_WATCHDOG),
            pmc_interval: env_get_us("DPT_PMC_US", defaults::PMC_US),
            park_timeout: Duration::from_millis(env_get(
                "DPT_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            stack_cache: env_get("DPT_STACK_CACHE", defaults::STACK_CACHE),
            pin_cores: env_get_bool("DPT_PIN_CORES", defaults::PIN_CORES),
            debug_logging: env_get_bool("DPT_DEBUG", defaults::DEBUG_LOGGING),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            num_cores: defaults::NUM_CORES,
            max_threads: defaults::MAX_THREADS,
            stack_size: defaults::STACK_SIZE,
            guard_size: defaults::GUARD_SIZE,
            rq_capacity: defaults::RQ_SIZE,
            softirq_local_budget: defaults::SOFTIRQ_LOCAL_BUDGET,
            softirq_remote_budget: defaults::SOFTIRQ_REMOTE_BUDGET,
            poll_iters: defaults::SCHED_POLL_ITERS,
            min_poll: Duration::from_micros(defaults::SCHED_MIN_POLL_US),
            watchdog_interval: Duration::from_micros(defaults::WATCHDOG_US),
            disable_watchdog: defaults::DISABLE_WATCHDOG,
            pmc_interval: Duration::from_micros(defaults::PMC_US),
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            stack_cache: defaults::STACK_CACHE,
            pin_cores: defaults::PIN_CORES,
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn num_cores(mut self, n: usize) -> Self {
        self.num_cores = n;
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn guard_size(mut self, size: usize) -> Self {
        self.guard_size = size;
        self
    }

    pub fn rq_capacity(mut self, cap: usize) -> Self {
        self.rq_capacity = cap;
        self
    }

    pub fn softirq_budgets(mut self, local: u32, remote: u32) -> Self {
        self.softirq_local_budget = local;
        self.softirq_remote_budget = remote;
        self
    }

    pub fn poll_iters(mut self, iters: u32) -> Self {
        self.poll_iters = iters;
        self
    }

    pub fn min_poll(mut self, d: Duration) -> Self {
        self.min_poll = d;
        self
    }

    pub fn watchdog_interval(mut self, d: Duration) -> Self {
        self.watchdog_interval = d;
        self
    }

    pub fn disable_watchdog(mut self, disable: bool) -> Self {
        self.disable_watchdog = disable;
        self
    }

    pub fn pmc_interval(mut self, d: Duration) -> Self {
        self.pmc_interval = d;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn stack_cache(mut self, n: usize) -> Self {
        self.stack_cache = n;
        self
    }

    pub fn pin_cores(mut self, pin: bool) -> Self {
        self.pin_cores = pin;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_cores == 0 {
            return Err(ConfigError::InvalidValue("num_cores must be > 0"));
        }
        if self.num_cores > MAX_CORES {
            return Err(ConfigError::InvalidValue("num_cores must be <= 64"));
        }
        if self.max_threads == 0 {
            return Err(ConfigError::InvalidValue("max_threads must be > 0"));
        }
        if self.stack_size < 16 * 1024 {
            return Err(ConfigError::InvalidValue("stack_size must be >= 16KB"));
        }
        if self.rq_capacity < 2 || !self.rq_capacity.is_power_of_two() {
            return Err(ConfigError::InvalidValue(
                "rq_capacity must be a power of two >= 2",
            ));
        }
        if self.rq_capacity > u32::MAX as usize / 2 {
            return Err(ConfigError::InvalidValue("rq_capacity too large"));
        }
        if self.softirq_local_budget == 0 || self.softirq_remote_budget == 0 {
            return Err(ConfigError::InvalidValue("softirq budgets must be > 0"));
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("park_timeout must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        kprintln!("dpthread Configuration:");
        kprintln!("  num_cores:              {}", self.num_cores);
        kprintln!("  max_threads:            {}", self.max_threads);
        kprintln!("  stack_size:             {}", self.stack_size);
        kprintln!("  guard_size:             {}", self.guard_size);
        kprintln!("  rq_capacity:            {}", self.rq_capacity);
        kprintln!("  softirq budgets:        {}/{}", self.softirq_local_budget, self.softirq_remote_budget);
        kprintln!("  poll_iters:             {}", self.poll_iters);
        kprintln!("  min_poll:               {:?}", self.min_poll);
        kprintln!("  watchdog_interval:      {:?}", self.watchdog_interval);
        kprintln!("  disable_watchdog:       {}", self.disable_watchdog);
        kprintln!("  pmc_interval:           {:?}", self.pmc_interval);
        kprintln!("  park_timeout:           {:?}", self.park_timeout);
        kprintln!("  stack_cache:            {}", self.stack_cache);
        kprintln!("  pin_cores:              {}", self.pin_cores);
        kprintln!("  debug_logging:          {}", self.debug_logging);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => SchedError::InvalidConfig(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = SchedulerConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.rq_capacity, 32);
        assert_eq!(config.softirq_local_budget, 16);
        assert_eq!(config.watchdog_interval, Duration::from_micros(50));
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::new()
            .num_cores(8)
            .min_poll(Duration::from_micros(5))
            .disable_watchdog(true);

        assert_eq!(config.num_cores, 8);
        assert_eq!(config.min_poll, Duration::from_micros(5));
        assert!(config.disable_watchdog);
    }

    #[test]
    fn test_validation() {
        assert!(SchedulerConfig::new().num_cores(0).validate().is_err());
        assert!(SchedulerConfig::new().num_cores(65).validate().is_err());
        assert!(SchedulerConfig::new().rq_capacity(24).validate().is_err());
        assert!(SchedulerConfig::new().rq_capacity(64).validate().is_ok());
        assert!(SchedulerConfig::new().max_threads(0).validate().is_err());
        assert!(SchedulerConfig::new()
            .park_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("DPT_SOFTIRQ_REMOTE_BUDGET", "4");
        let config = SchedulerConfig::from_env();
        std::env::remove_var("DPT_SOFTIRQ_REMOTE_BUDGET");
        assert_eq!(config.softirq_remote_budget, 4);
    }

    #[test]
    fn test_config_error_converts() {
        let err: SchedError = SchedulerConfig::new()
            .num_cores(0)
            .validate()
            .unwrap_err()
            .into();
        assert_eq!(err, SchedError::InvalidConfig("num_cores must be > 0"));
    }
}
