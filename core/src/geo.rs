//! Geospatial helpers: distance, containment, obfuscation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A WGS84 coordinate pair, `[longitude, latitude]` order as stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Longitude in degrees.
    pub lng: f64,
    /// Latitude in degrees.
    pub lat: f64,
}

impl GeoPoint {
    /// Construct a point from `[lng, lat]`.
    #[must_use]
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Returns `true` if both components are finite and in range.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

/// Mean Earth radius, meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points, meters (Haversine).
#[must_use]
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Axis-aligned bounding box, degrees.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    /// Western edge.
    pub min_lng: f64,
    /// Eastern edge.
    pub max_lng: f64,
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
}

impl BoundingBox {
    /// Returns `true` if the point lies inside the box (inclusive).
    #[must_use]
    pub fn contains(&self, p: GeoPoint) -> bool {
        (self.min_lng..=self.max_lng).contains(&p.lng)
            && (self.min_lat..=self.max_lat).contains(&p.lat)
    }
}

/// Precomputed service-area boxes. The mainland box plus the coastal
/// island belt, which falls outside the mainland rectangle.
pub const SERVICE_AREA: &[BoundingBox] = &[
    // Bangladesh mainland
    BoundingBox {
        min_lng: 88.0,
        max_lng: 92.7,
        min_lat: 20.6,
        max_lat: 26.7,
    },
    // St. Martin's island belt
    BoundingBox {
        min_lng: 92.2,
        max_lng: 92.4,
        min_lat: 20.5,
        max_lat: 20.7,
    },
];

/// Returns `true` if the point is within the recognized service area.
#[must_use]
pub fn within_service_area(p: GeoPoint) -> bool {
    SERVICE_AREA.iter().any(|b| b.contains(p))
}

/// Maximum obfuscation displacement, degrees (~100 m at the equator).
const OBFUSCATION_SPREAD_DEG: f64 = 0.0009;

/// Deterministically displace a coordinate for public display.
///
/// The displacement is derived from `seed` (the report id), so repeated
/// reads of the same report produce the same public point while the
/// original stays admin-only.
#[must_use]
pub fn obfuscate(p: GeoPoint, seed: &str) -> GeoPoint {
    let digest = Sha256::digest(seed.as_bytes());

    // Two independent lanes of the digest, mapped to [-1, 1].
    let lane = |offset: usize| -> f64 {
        let raw = [
            digest[offset],
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ];
        let unit = f64::from(u32::from_le_bytes(raw)) / f64::from(u32::MAX);
        unit.mul_add(2.0, -1.0)
    };

    GeoPoint {
        lng: p.lng + lane(0) * OBFUSCATION_SPREAD_DEG,
        lat: p.lat + lane(8) * OBFUSCATION_SPREAD_DEG,
    }
}

/// GPS accuracy buckets used by the deep-analysis rubric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyBucket {
    /// Sub-20 m fixes.
    Precise,
    /// 20–100 m.
    Good,
    /// 100–1000 m.
    Coarse,
    /// Worse than 1 km; typical of IP-derived or spoofed fixes.
    Implausible,
}

/// Bucket a reported GPS accuracy radius, meters.
#[must_use]
pub fn accuracy_bucket(accuracy_m: f64) -> AccuracyBucket {
    if accuracy_m < 20.0 {
        AccuracyBucket::Precise
    } else if accuracy_m < 100.0 {
        AccuracyBucket::Good
    } else if accuracy_m < 1_000.0 {
        AccuracyBucket::Coarse
    } else {
        AccuracyBucket::Implausible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // Dhaka to Chittagong, roughly 215 km.
        let dhaka = GeoPoint::new(90.4125, 23.8103);
        let chittagong = GeoPoint::new(91.8349, 22.3569);
        let d = haversine_meters(dhaka, chittagong);
        assert!((210_000.0..225_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = GeoPoint::new(90.41, 23.81);
        assert!(haversine_meters(p, p) < 1e-6);
    }

    #[test]
    fn dhaka_is_inside_service_area() {
        assert!(within_service_area(GeoPoint::new(90.4125, 23.8103)));
        // Kolkata is not.
        assert!(!within_service_area(GeoPoint::new(87.36, 22.57)));
    }

    #[test]
    fn obfuscation_is_deterministic_and_bounded() {
        let p = GeoPoint::new(90.41, 23.81);
        let a = obfuscate(p, "report-1");
        let b = obfuscate(p, "report-1");
        let c = obfuscate(p, "report-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(haversine_meters(p, a) < 250.0);
        assert!(haversine_meters(p, a) > 0.0);
    }

    #[test]
    fn accuracy_buckets() {
        assert_eq!(accuracy_bucket(5.0), AccuracyBucket::Precise);
        assert_eq!(accuracy_bucket(50.0), AccuracyBucket::Good);
        assert_eq!(accuracy_bucket(500.0), AccuracyBucket::Coarse);
        assert_eq!(accuracy_bucket(5_000.0), AccuracyBucket::Implausible);
    }
}
