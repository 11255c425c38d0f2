//! Trust-core configuration.
//!
//! Configuration values should be provided by the application, not
//! hardcoded. Every tunable the core recognizes is enumerated here;
//! [`CoreConfig::from_env`] reads the `CIVICWATCH_*` environment.

use chrono::Duration;

/// Top-level configuration for the trust core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Document-store connection URL (PostgreSQL).
    pub document_store_url: String,

    /// Key-value store connection URL (Redis, single node or cluster seed).
    pub cache_url: String,

    /// Cache facade tunables.
    pub cache: CacheConfig,

    /// Submission gate tunables.
    pub gate: GateConfig,

    /// Scoring engine and background processor tunables.
    pub scoring: ScoringConfig,

    /// Coordinated-attack detector tunables.
    pub detector: DetectorConfig,

    /// Quarantine lifecycle tunables.
    pub quarantine: QuarantineConfig,
}

impl CoreConfig {
    /// Create a configuration with spec defaults for the given stores.
    #[must_use]
    pub fn new(document_store_url: String, cache_url: String) -> Self {
        Self {
            document_store_url,
            cache_url,
            cache: CacheConfig::default(),
            gate: GateConfig::default(),
            scoring: ScoringConfig::default(),
            detector: DetectorConfig::default(),
            quarantine: QuarantineConfig::default(),
        }
    }

    /// Build a configuration from `CIVICWATCH_*` environment variables.
    ///
    /// Unset or unparseable variables fall back to defaults; only the two
    /// store URLs are read as-is (defaulting to local instances).
    #[must_use]
    pub fn from_env() -> Self {
        let document_store_url = std::env::var("CIVICWATCH_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/civicwatch".to_string());
        let cache_url = std::env::var("CIVICWATCH_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let mut config = Self::new(document_store_url, cache_url);

        if let Some(v) = env_u32("CIVICWATCH_SUBMIT_LIMIT") {
            config.gate.submission_limit = v;
        }
        if let Some(v) = env_i64("CIVICWATCH_SUBMIT_WINDOW_SECS") {
            config.gate.submission_window = Duration::seconds(v);
        }
        if let Some(v) = env_i64("CIVICWATCH_QUARANTINE_HOURS") {
            config.quarantine.default_duration = Duration::hours(v);
        }
        if let Some(v) = env_u32("CIVICWATCH_ANALYSIS_BATCH_SIZE") {
            config.scoring.batch_size = v as usize;
        }
        if let Some(v) = env_i64("CIVICWATCH_SWEEP_INTERVAL_SECS") {
            config.detector.sweep_interval = Duration::seconds(v);
        }
        if let Some(v) = env_i64("CIVICWATCH_SWEEP_WINDOW_SECS") {
            config.detector.window = Duration::seconds(v);
        }
        if let Some(v) = env_f64("CIVICWATCH_PROXIMITY_RADIUS_M") {
            config.detector.proximity_radius_m = v;
        }
        if let Some(v) = env_f64("CIVICWATCH_ANOMALY_SMOOTHING_DELTA") {
            config.scoring.anomaly_smoothing_delta = v;
        }

        config
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.parse().ok()
}

/// Cache facade tunables.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Initial reconnect delay after a lost connection.
    pub reconnect_base_delay: std::time::Duration,

    /// Ceiling for the exponential reconnect backoff.
    pub reconnect_ceiling: std::time::Duration,

    /// Reconnect attempts before the facade stays degraded until an
    /// explicit reinitialization.
    pub max_reconnect_attempts: u32,

    /// Distributed-lock time-to-live in seconds.
    pub lock_ttl_secs: u64,

    /// Distributed-lock acquisition attempts.
    pub lock_retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: std::time::Duration::from_millis(100),
            reconnect_ceiling: std::time::Duration::from_secs(30),
            max_reconnect_attempts: 10,
            lock_ttl_secs: 30,
            lock_retries: 3,
        }
    }
}

/// Submission gate tunables.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Maximum report submissions per device per window.
    pub submission_limit: u32,

    /// Sliding window for the submission limit.
    pub submission_window: Duration,

    /// Failed admin logins tolerated inside the attempt window.
    pub login_max_attempts: u32,

    /// Window over which failed logins accumulate.
    pub login_attempt_window: Duration,

    /// How long a locked admin account stays locked.
    pub login_lock_duration: Duration,

    /// Grace period given to in-flight requests on shutdown.
    pub shutdown_grace: std::time::Duration,
}

impl GateConfig {
    /// Set the per-device submission budget.
    #[must_use]
    pub const fn with_submission_limit(mut self, limit: u32, window: Duration) -> Self {
        self.submission_limit = limit;
        self.submission_window = window;
        self
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            submission_limit: 10,
            submission_window: Duration::minutes(10),
            login_max_attempts: 5,
            login_attempt_window: Duration::minutes(15),
            login_lock_duration: Duration::minutes(30),
            shutdown_grace: std::time::Duration::from_secs(10),
        }
    }
}

/// Scoring engine and background processor tunables.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Devices popped from the priority queue per worker iteration.
    pub batch_size: usize,

    /// Deep-analysis attempts before a queue entry is dead-lettered.
    pub max_attempts: u32,

    /// Worker tasks for the emergency tier.
    pub emergency_workers: usize,

    /// Worker tasks for the standard tier.
    pub standard_workers: usize,

    /// Worker tasks for the background tier.
    pub background_workers: usize,

    /// Worker tasks for the analytics tier.
    pub analytics_workers: usize,

    /// Per-device deep-analysis deadline.
    pub device_deadline: std::time::Duration,

    /// Maximum anomaly-score movement per save.
    pub anomaly_smoothing_delta: f64,

    /// Delay between queue polls when the queue is empty.
    pub idle_poll_interval: std::time::Duration,
}

impl ScoringConfig {
    /// Set worker pool sizes per tier.
    #[must_use]
    pub const fn with_workers(
        mut self,
        emergency: usize,
        standard: usize,
        background: usize,
        analytics: usize,
    ) -> Self {
        self.emergency_workers = emergency;
        self.standard_workers = standard;
        self.background_workers = background;
        self.analytics_workers = analytics;
        self
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 3,
            emergency_workers: 2,
            standard_workers: 3,
            background_workers: 2,
            analytics_workers: 1,
            device_deadline: std::time::Duration::from_secs(30),
            anomaly_smoothing_delta: 15.0,
            idle_poll_interval: std::time::Duration::from_secs(2),
        }
    }
}

/// Coordinated-attack detector tunables.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Interval between periodic sweeps.
    pub sweep_interval: Duration,

    /// Activity window a sweep examines.
    pub window: Duration,

    /// Geographic proximity radius for correlation candidates, meters.
    pub proximity_radius_m: f64,

    /// Distributed-lock time-to-live for the sweep, seconds.
    pub lock_ttl_secs: u64,

    /// Minimum unique devices before a group can be flagged.
    pub min_group_devices: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::minutes(10),
            window: Duration::hours(1),
            proximity_radius_m: 1_000.0,
            lock_ttl_secs: 30,
            min_group_devices: 3,
        }
    }
}

/// Quarantine lifecycle tunables.
#[derive(Debug, Clone)]
pub struct QuarantineConfig {
    /// Default quarantine duration for auto-quarantine.
    pub default_duration: Duration,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            default_duration: Duration::hours(24),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = CoreConfig::new("postgres://x".into(), "redis://y".into());
        assert_eq!(config.gate.submission_limit, 10);
        assert_eq!(config.gate.login_max_attempts, 5);
        assert_eq!(config.gate.login_lock_duration, Duration::minutes(30));
        assert_eq!(config.quarantine.default_duration, Duration::hours(24));
        assert_eq!(config.scoring.anomaly_smoothing_delta, 15.0);
        assert_eq!(config.detector.sweep_interval, Duration::minutes(10));
        assert_eq!(config.detector.window, Duration::hours(1));
        assert_eq!(config.detector.proximity_radius_m, 1_000.0);
        assert_eq!(config.scoring.emergency_workers, 2);
        assert_eq!(config.scoring.standard_workers, 3);
    }

    #[test]
    fn builders_override() {
        let gate = GateConfig::default().with_submission_limit(10, Duration::minutes(5));
        assert_eq!(gate.submission_limit, 10);
        assert_eq!(gate.submission_window, Duration::minutes(5));

        let scoring = ScoringConfig::default().with_workers(1, 1, 1, 1);
        assert_eq!(scoring.standard_workers, 1);
    }
}
