//! Well-known cache keys, queue names and TTLs.

/// Deep-analysis priority queue (sorted set).
pub const ANALYSIS_QUEUE_KEY: &str = "civicwatch:queue:analysis";

/// Dead-letter list for analysis jobs that exhausted their attempts.
pub const ANALYSIS_DEAD_LETTER_KEY: &str = "civicwatch:queue:analysis:dead";

/// Cached device documents, keyed by fingerprint. 1 hour.
pub const DEVICE_CACHE_TTL_SECS: u64 = 3_600;

/// Cached trust-score evaluations. 5 minutes.
pub const TRUST_CACHE_TTL_SECS: u64 = 300;

/// Cached cross-device correlation results. 30 minutes.
pub const CORRELATION_CACHE_TTL_SECS: u64 = 1_800;

/// Cached coordinated-attack suspicion records. 10 minutes.
pub const SUSPICION_CACHE_TTL_SECS: u64 = 600;

/// Admin dashboard aggregate.
pub const ADMIN_DASHBOARD_KEY: &str = "civicwatch:admin:dashboard:stats";

/// Admin security-analytics aggregate.
pub const ADMIN_SECURITY_ANALYTICS_KEY: &str = "civicwatch:admin:analytics:security";

/// Flagged-report listing.
pub const FLAGGED_REPORTS_KEY: &str = "civicwatch:admin:reports:flagged";

/// Versioned namespace covering admin aggregates.
pub const NS_ADMIN: &str = "admin";

/// Versioned namespace covering report listings.
pub const NS_REPORTS: &str = "reports";

/// Distributed-lock resource guarding the coordinated-attack sweep.
pub const COORDINATED_LOCK_RESOURCE: &str = "analysis:coordinated";

/// Pattern covering processing-related cache keys, cleared on shutdown.
pub const PROCESSING_CACHE_PATTERN: &str = "civicwatch:processing:*";
