//! Deep-analysis rubric: the full anomaly recomputation target.
//!
//! The save-path fast scoring (`Device::run_presave`) uses a light
//! additive factor set; this module is the documented fuller rubric the
//! background processor evaluates: signature consistency, language and
//! timezone plausibility, GPS accuracy bucketing, long-term histogram
//! outliers and threat-intelligence match scoring. Everything here is
//! pure so the engine stays a thin IO shell around it.

use crate::device::Device;
use crate::geo::{self, AccuracyBucket};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timezones plausible for in-country devices.
const PLAUSIBLE_TIMEZONES: &[&str] = &["Asia/Dhaka", "Asia/Kolkata"];

/// Component breakdown of a deep analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepAnalysis {
    /// Network-based component.
    pub network: f64,
    /// Behavior-based component.
    pub behavior: f64,
    /// Device-signature component.
    pub signature: f64,
    /// Location-consistency component.
    pub location: f64,
    /// Security-flag component.
    pub security: f64,
    /// Historical-pattern component.
    pub historical: f64,
    /// Submission histogram shows a concentrated outlier.
    pub histogram_outlier: bool,
    /// Recomputed anomaly target, 0–100.
    pub anomaly_target: f64,
    /// Recomputed threat confidence, 0–100.
    pub threat_confidence: f64,
}

/// Evaluate the full rubric against a device. Pure; does not mutate.
#[must_use]
pub fn analyze_device(device: &Device, now: DateTime<Utc>) -> DeepAnalysis {
    let network = network_component(device);
    let behavior = behavior_component(device);
    let signature = signature_component(device);
    let location = location_component(device);
    let security = security_component(device);
    let historical = historical_component(device, now);
    let histogram_outlier = histogram_outlier(device);

    let mut target = network + behavior + signature + location + security + historical;
    if histogram_outlier {
        target += 8.0;
    }

    DeepAnalysis {
        network,
        behavior,
        signature,
        location,
        security,
        historical,
        histogram_outlier,
        anomaly_target: target.clamp(0.0, 100.0),
        threat_confidence: threat_match_confidence(device),
    }
}

/// Apply a deep-analysis result to the device, honoring the per-save
/// smoothing cap and clearing the analysis request.
pub fn apply_deep_analysis(
    device: &mut Device,
    analysis: &DeepAnalysis,
    smoothing_delta: f64,
    now: DateTime<Utc>,
) {
    let previous = device.anomaly.previous_score;
    let mut score = analysis.anomaly_target;
    let delta = score - previous;
    if delta.abs() > smoothing_delta {
        score = previous + smoothing_delta.copysign(delta);
    }
    device.anomaly.score = score;
    device.anomaly.previous_score = score;
    device.anomaly.needs_detailed_analysis = false;
    device.anomaly.analysis_priority = crate::types::AnalysisPriority::default();
    device.anomaly.queue_position = None;

    device.threat.threat_confidence = analysis.threat_confidence;
    device.threat.last_threat_assessment = now;
    if analysis.histogram_outlier {
        device.submission_pattern.suspicious_time_patterns = true;
        if !device
            .threat
            .suspicious_patterns
            .iter()
            .any(|p| p == "concentrated_submission_hours")
        {
            device
                .threat
                .suspicious_patterns
                .push("concentrated_submission_hours".to_string());
        }
    }
    device.threat.reporting_frequency = Some(reporting_frequency_label(device));

    // Content-similarity ownership of the spam suspicion flag.
    if device.threat.content_similarity > 70.0 {
        device.security.spam_suspected = true;
    }

    // Regional plausibility is earned here, never assumed at creation.
    let local_evidence = device.signature.timezone.as_deref() == Some("Asia/Dhaka")
        || device
            .signature
            .languages
            .iter()
            .any(|language| language.starts_with("bn"));
    if local_evidence {
        device.region.likely_from_bd = true;
    }

    device.processing.last_detailed_analysis = Some(now);
    device.processing.analysis_in_progress = false;
}

// ═══════════════════════════════════════════════════════════════════════
// Components
// ═══════════════════════════════════════════════════════════════════════

// Network-based anomaly detection
fn network_component(device: &Device) -> f64 {
    let mut score = 0.0;
    if device.network.vpn_suspected {
        score += 15.0;
    }
    if device.network.proxy_detected {
        score += 10.0;
    }
    if device.network.tor_detected {
        score += 20.0;
    }
    if !device.network.suspicious_headers.is_empty() {
        score += 5.0;
    }
    score
}

// Behavior-based anomaly detection
fn behavior_component(device: &Device) -> f64 {
    let mut score = 0.0;
    let human = device.behavior.human_behavior_score;
    if human < 20.0 {
        score += 20.0;
    } else if human < 40.0 {
        score += 10.0;
    } else if human < 60.0 {
        score += 5.0;
    }
    if device.behavior.reporting_frequency > 10.0 {
        score += 8.0;
    }
    if device.behavior.session_length > 0.0 && device.behavior.session_length < 0.5 {
        score += 5.0;
    }
    score
}

// Device signature anomaly detection
fn signature_component(device: &Device) -> f64 {
    let mut score = 0.0;

    if matches!(
        device.signature.screen_resolution.as_deref(),
        Some("800x600" | "1024x768")
    ) {
        score += 8.0;
    }

    if let Some(tz) = device.signature.timezone.as_deref() {
        if !PLAUSIBLE_TIMEZONES.contains(&tz) {
            score += 12.0;
        }
    }

    let languages = &device.signature.languages;
    if !languages.is_empty()
        && !languages.iter().any(|l| l.starts_with("bn") || l.starts_with("en"))
    {
        score += 8.0;
    }

    if let Some(previous) = &device.previous_signature {
        let changes = [
            device.signature.user_agent != previous.user_agent,
            device.signature.screen_resolution != previous.screen_resolution,
            device.signature.timezone != previous.timezone,
        ]
        .iter()
        .filter(|c| **c)
        .count();
        if changes >= 2 {
            score += 8.0;
        }
    }

    score
}

// Location consistency check
fn location_component(device: &Device) -> f64 {
    let mut score = 0.0;
    if device.location.cross_border_activity {
        score += 15.0;
    }
    if device.location.location_jumps > 3 {
        score += 10.0;
    }
    if geo::accuracy_bucket(device.location.gps_accuracy_m) == AccuracyBucket::Implausible {
        score += 5.0;
    }
    score
}

// Security flags
fn security_component(device: &Device) -> f64 {
    let mut score = 0.0;
    if device.security.spam_suspected {
        score += 8.0;
    }
    if device.security.spoofing_suspected {
        score += 12.0;
    }
    if device.security.flagged_reports > 0 {
        score += (f64::from(device.security.flagged_reports) * 2.0).min(10.0);
    }
    score
}

// Historical behavior patterns
fn historical_component(device: &Device, now: DateTime<Utc>) -> f64 {
    let mut score = 0.0;
    if device.security.total_reports_submitted > 50 && device.security.approved_reports == 0 {
        score += 15.0;
    }
    if device.activity.average_session_duration > 0.0
        && device.activity.average_session_duration < 1.0
    {
        score += 5.0;
    }
    // A long-lived device with a still-empty approval record is odd.
    let age_days = (now - device.activity.first_seen).num_days();
    if age_days > 90
        && device.security.total_reports_submitted > 20
        && device.approval_rate() < 0.05
    {
        score += 5.0;
    }
    score
}

/// Whether the hourly histogram concentrates in one hour: more than 60%
/// of a meaningful sample landing in the single busiest hour.
#[must_use]
pub fn histogram_outlier(device: &Device) -> bool {
    let total = device.submission_pattern.total();
    if total <= 20 {
        return false;
    }
    let max = device
        .submission_pattern
        .hourly_distribution
        .iter()
        .copied()
        .max()
        .unwrap_or(0);
    f64::from(max) / f64::from(total) > 0.6
}

/// Threat-intelligence match scoring: feed matches blended with the
/// confirmed campaign flags.
#[must_use]
pub fn threat_match_confidence(device: &Device) -> f64 {
    let matches = &device.threat.matches;
    let mut confidence = if matches.is_empty() {
        // No live matches: decay the previous assessment.
        device.threat.threat_confidence * 0.9
    } else {
        let max = matches.iter().map(|m| m.confidence).fold(0.0, f64::max);
        let mean = matches.iter().map(|m| m.confidence).sum::<f64>() / matches.len() as f64;
        max * 0.6 + mean * 0.4
    };

    if device.threat.coordinated_attack_participant {
        confidence += 20.0;
    }
    if device.threat.botnet_member {
        confidence += 30.0;
    }
    if device.threat.mass_reporting_campaign {
        confidence += 15.0;
    }

    confidence.clamp(0.0, 100.0)
}

fn reporting_frequency_label(device: &Device) -> String {
    let frequency = device.behavior.reporting_frequency;
    if frequency > 10.0 {
        "burst".to_string()
    } else if frequency > 2.0 {
        "elevated".to_string()
    } else {
        "normal".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::ThreatMatch;
    use crate::types::FingerprintId;

    fn device() -> Device {
        Device::new(FingerprintId::new("fp-deep").unwrap(), Utc::now())
    }

    #[test]
    fn clean_device_scores_near_zero() {
        let d = device();
        let analysis = analyze_device(&d, Utc::now());
        assert_eq!(analysis.network, 0.0);
        assert_eq!(analysis.anomaly_target, 0.0);
        assert_eq!(analysis.threat_confidence, 0.0);
    }

    #[test]
    fn tor_plus_bot_behavior_accumulates() {
        let mut d = device();
        d.network.tor_detected = true;
        d.behavior.human_behavior_score = 15.0;
        let analysis = analyze_device(&d, Utc::now());
        assert_eq!(analysis.network, 20.0);
        assert_eq!(analysis.behavior, 20.0);
        assert!(analysis.anomaly_target >= 40.0);
    }

    #[test]
    fn implausible_timezone_and_languages() {
        let mut d = device();
        d.signature.timezone = Some("Europe/Berlin".to_string());
        d.signature.languages = vec!["de-DE".to_string()];
        let analysis = analyze_device(&d, Utc::now());
        assert_eq!(analysis.signature, 20.0);

        d.signature.timezone = Some("Asia/Dhaka".to_string());
        d.signature.languages = vec!["bn-BD".to_string(), "en-US".to_string()];
        let analysis = analyze_device(&d, Utc::now());
        assert_eq!(analysis.signature, 0.0);
    }

    #[test]
    fn gps_accuracy_bucketing_contributes() {
        let mut d = device();
        d.location.gps_accuracy_m = 2_500.0;
        let analysis = analyze_device(&d, Utc::now());
        assert_eq!(analysis.location, 5.0);
    }

    #[test]
    fn histogram_outlier_needs_volume_and_concentration() {
        let mut d = device();
        d.submission_pattern.hourly_distribution[3] = 15;
        assert!(!histogram_outlier(&d)); // only 15 total

        d.submission_pattern.hourly_distribution[3] = 30;
        d.submission_pattern.hourly_distribution[9] = 5;
        assert!(histogram_outlier(&d)); // 30/35 in one hour

        d.submission_pattern.hourly_distribution = [2; 24];
        assert!(!histogram_outlier(&d)); // spread out
    }

    #[test]
    fn threat_matches_blend_with_flags() {
        let mut d = device();
        d.threat.matches.push(ThreatMatch {
            source: "feed-a".to_string(),
            confidence: 80.0,
            kind: "ip_reputation".to_string(),
            timestamp: Utc::now(),
        });
        d.threat.matches.push(ThreatMatch {
            source: "feed-b".to_string(),
            confidence: 40.0,
            kind: "ua_blocklist".to_string(),
            timestamp: Utc::now(),
        });
        // 0.6×80 + 0.4×60 = 72
        assert!((threat_match_confidence(&d) - 72.0).abs() < 1e-9);

        d.threat.botnet_member = true;
        assert_eq!(threat_match_confidence(&d), 100.0);
    }

    #[test]
    fn stale_confidence_decays_without_matches() {
        let mut d = device();
        d.threat.threat_confidence = 50.0;
        assert!((threat_match_confidence(&d) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn apply_honors_smoothing_invariant() {
        let now = Utc::now();
        let mut d = device();
        d.anomaly.previous_score = 10.0;
        d.anomaly.needs_detailed_analysis = true;

        let mut analysis = analyze_device(&d, now);
        analysis.anomaly_target = 90.0;
        apply_deep_analysis(&mut d, &analysis, 15.0, now);

        assert_eq!(d.anomaly.score, 25.0);
        assert!(!d.anomaly.needs_detailed_analysis);
        assert!(d.processing.last_detailed_analysis.is_some());
    }
}
