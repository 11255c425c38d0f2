//! Shared identifier and classification types.
//!
//! All types are `Clone` + `Serialize` so entities round-trip through the
//! JSONB document store unchanged.

use crate::error::{CoreError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Stable opaque identifier for a principal.
///
/// Operator-provisioned principals carry UUID-shaped ids; anonymous
/// principals minted at promotion time carry `anon_<ts>_<rand>` ids and
/// ephemeral in-memory principals carry `ephemeral_anon_<ts>_<rand>` ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    /// Generate an id for an operator-provisioned principal.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Generate an id for a persistent anonymous principal.
    #[must_use]
    pub fn new_anonymous(now: chrono::DateTime<chrono::Utc>) -> Self {
        Self(format!("anon_{}_{}", now.timestamp_millis(), random_suffix()))
    }

    /// Generate an id for an ephemeral anonymous principal.
    ///
    /// Ephemeral ids are never persisted; promotion mints a fresh
    /// [`PrincipalId::new_anonymous`] id instead.
    #[must_use]
    pub fn new_ephemeral(now: chrono::DateTime<chrono::Utc>) -> Self {
        Self(format!(
            "ephemeral_anon_{}_{}",
            now.timestamp_millis(),
            random_suffix()
        ))
    }

    /// Returns `true` if this id names an ephemeral principal.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.0.starts_with("ephemeral_anon_")
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque device fingerprint identifier (at most 64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerprintId(String);

impl FingerprintId {
    /// Maximum accepted fingerprint length.
    pub const MAX_LEN: usize = 64;

    /// Validate and wrap a client-supplied fingerprint id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] if the id is empty or longer
    /// than [`Self::MAX_LEN`].
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CoreError::InvalidValue {
                field: "fingerprint_id",
                reason: "must not be empty".to_string(),
            });
        }
        if raw.len() > Self::MAX_LEN {
            return Err(CoreError::InvalidValue {
                field: "fingerprint_id",
                reason: format!("exceeds {} characters", Self::MAX_LEN),
            });
        }
        Ok(Self(raw))
    }

    /// The raw fingerprint string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FingerprintId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned report identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportId(pub uuid::Uuid);

impl ReportId {
    /// Generate a new random `ReportId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

fn random_suffix() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..9)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Classification Types
// ═══════════════════════════════════════════════════════════════════════

/// Coarse risk classification over the continuous trust/threat/anomaly
/// space, used by gates and dashboards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Established trustworthy source.
    VeryLow,
    /// Ordinary source with no strong signal either way.
    Low,
    /// Default tier for unknown sources.
    #[default]
    Medium,
    /// Elevated threat or depressed trust.
    High,
    /// Active threat; quarantine candidates live here.
    Critical,
}

impl RiskTier {
    /// Wire/database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse the wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] for unknown tiers.
    pub fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "very_low" => Ok(Self::VeryLow),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(CoreError::InvalidValue {
                field: "risk_tier",
                reason: format!("unknown tier: {other}"),
            }),
        }
    }
}

/// Deep-analysis queue priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPriority {
    /// Best-effort re-scoring.
    Low,
    /// Ordinary queued analysis.
    #[default]
    Medium,
    /// Signature drift and similar strong signals.
    High,
    /// Critical-risk devices; processed ahead of everything else.
    Critical,
}

impl AnalysisPriority {
    /// Score band for the sorted-set queue; lower pops first.
    #[must_use]
    pub const fn band(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

/// Distributed-processing tier assigned to a report at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingTier {
    /// Severity-5 and female-sensitive incidents.
    Emergency,
    /// Severity 3–4.
    #[default]
    Standard,
    /// Severity 1–2.
    Background,
    /// Batch re-scoring jobs.
    Analytics,
}

impl ProcessingTier {
    /// Queue name for this tier.
    #[must_use]
    pub const fn queue_name(self) -> &'static str {
        match self {
            Self::Emergency => "reports:emergency",
            Self::Standard => "reports:standard",
            Self::Background => "reports:background",
            Self::Analytics => "reports:analytics",
        }
    }
}

/// Incident severity, constrained to 1–5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Severity(u8);

impl Severity {
    /// Validate and wrap a severity value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] outside 1–5.
    pub fn new(value: u8) -> Result<Self> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidValue {
                field: "severity",
                reason: format!("must be 1-5, got {value}"),
            })
        }
    }

    /// The numeric severity.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Severity attached to security and audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    /// Informational.
    Low,
    /// Worth reviewing.
    Medium,
    /// Needs operator attention.
    High,
    /// Triggers automatic countermeasures.
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_length_is_enforced() {
        assert!(FingerprintId::new("fp-A").is_ok());
        assert!(FingerprintId::new("").is_err());
        assert!(FingerprintId::new("x".repeat(64)).is_ok());
        assert!(FingerprintId::new("x".repeat(65)).is_err());
    }

    #[test]
    fn ephemeral_ids_are_marked() {
        let now = chrono::Utc::now();
        assert!(PrincipalId::new_ephemeral(now).is_ephemeral());
        assert!(!PrincipalId::new_anonymous(now).is_ephemeral());
        assert!(!PrincipalId::new().is_ephemeral());
    }

    #[test]
    fn severity_bounds() {
        assert!(Severity::new(0).is_err());
        assert!(Severity::new(1).is_ok());
        assert!(Severity::new(5).is_ok());
        assert!(Severity::new(6).is_err());
    }

    #[test]
    fn risk_tier_round_trip() {
        for tier in [
            RiskTier::VeryLow,
            RiskTier::Low,
            RiskTier::Medium,
            RiskTier::High,
            RiskTier::Critical,
        ] {
            assert_eq!(RiskTier::from_str(tier.as_str()).ok(), Some(tier));
        }
        assert!(RiskTier::from_str("bogus").is_err());
    }

    #[test]
    fn priority_bands_order_queue_pops() {
        assert!(AnalysisPriority::Critical.band() < AnalysisPriority::High.band());
        assert!(AnalysisPriority::High.band() < AnalysisPriority::Medium.band());
        assert!(AnalysisPriority::Medium.band() < AnalysisPriority::Low.band());
    }
}
