//! Geographic ranking support
//!
//! The router orders candidate endpoints by great-circle distance from the
//! client. IP-to-coordinate resolution sits behind a trait: production wires
//! a GeoIP database (out of scope here), and administrators can pin specific
//! addresses to coordinates through overrides.

use std::collections::HashMap;
use std::net::IpAddr;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates, in kilometers.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Resolves a client address to coordinates.
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, ip: IpAddr) -> Option<Coordinate>;
}

/// Table-driven resolver: admin overrides first, then an optional default.
#[derive(Debug, Default)]
pub struct StaticResolver {
    overrides: HashMap<IpAddr, Coordinate>,
    default: Option<Coordinate>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, ip: IpAddr, coordinate: Coordinate) -> Self {
        self.overrides.insert(ip, coordinate);
        self
    }

    pub fn with_default(mut self, coordinate: Coordinate) -> Self {
        self.default = Some(coordinate);
        self
    }
}

impl GeoResolver for StaticResolver {
    fn resolve(&self, ip: IpAddr) -> Option<Coordinate> {
        self.overrides.get(&ip).copied().or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MADISON: Coordinate = Coordinate { lat: 43.07, lon: -89.4 };
    const SAN_FRANCISCO: Coordinate = Coordinate { lat: 37.77, lon: -122.42 };
    const CHICAGO: Coordinate = Coordinate { lat: 41.88, lon: -87.63 };

    #[test]
    fn test_haversine_known_distances() {
        // Chicago to Madison is roughly 200 km; Chicago to San Francisco
        // roughly 2,990 km.
        let near = haversine_km(CHICAGO, MADISON);
        let far = haversine_km(CHICAGO, SAN_FRANCISCO);

        assert!((150.0..250.0).contains(&near), "got {}", near);
        assert!((2800.0..3200.0).contains(&far), "got {}", far);
        assert!(near < far);
    }

    #[test]
    fn test_haversine_zero_for_same_point() {
        assert!(haversine_km(MADISON, MADISON) < 1e-6);
    }

    #[test]
    fn test_static_resolver_override_beats_default() {
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        let resolver = StaticResolver::new()
            .with_default(SAN_FRANCISCO)
            .with_override(ip, MADISON);

        assert_eq!(resolver.resolve(ip), Some(MADISON));
        assert_eq!(
            resolver.resolve("198.51.100.1".parse().unwrap()),
            Some(SAN_FRANCISCO)
        );
    }
}
