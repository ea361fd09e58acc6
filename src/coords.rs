// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::f64::consts::PI;

/// Mean radius of Earth, in meters.
/// Source: https://en.wikipedia.org/wiki/Earth_radius#Arithmetic_mean_radius
const EARTH_RADIUS: f64 = 6_371_008.8;

/// Mean diameter of Earth, in meters.
/// Source: https://en.wikipedia.org/wiki/Earth_radius#Arithmetic_mean_radius
const EARTH_DIAMETER: f64 = EARTH_RADIUS + EARTH_RADIUS;

/// Number of [UnsignedCoordinate] units per normalized map unit (2^32).
const COORDINATE_SCALE: f64 = 4294967296.0;

/// A position on Earth in decimal WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpsCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Calculates the great-circle distance to another position using the
    /// [haversine formula](https://en.wikipedia.org/wiki/Haversine_formula).
    /// Returns the result in meters.
    pub fn distance(self, other: GpsCoordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lon1 = self.longitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let lon2 = other.longitude.to_radians();

        let sin_dlat_half = ((lat2 - lat1) * 0.5).sin();
        let sin_dlon_half = ((lon2 - lon1) * 0.5).sin();

        let h =
            sin_dlat_half * sin_dlat_half + lat1.cos() * lat2.cos() * sin_dlon_half * sin_dlon_half;

        EARTH_DIAMETER * h.sqrt().asin()
    }

    /// Calculates the distance to another position in meters using the
    /// [equirectangular approximation](https://www.movable-type.co.uk/scripts/latlong.html),
    /// which is cheaper than [GpsCoordinate::distance] but degrades for
    /// points far apart or close to the poles. Used for radius
    /// classification, where small relative errors are acceptable.
    pub fn approximate_distance(self, other: GpsCoordinate) -> f64 {
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians()
            * ((self.latitude + other.latitude) * 0.5).to_radians().cos();
        EARTH_RADIUS * (dlat * dlat + dlon * dlon).sqrt()
    }
}

/// A position projected onto a fixed unsigned 32-bit grid.
///
/// Longitude -180..+180 maps linearly onto the full x range; latitude maps
/// through the Web-Mercator function onto y, with y growing towards the
/// south. The projection is deterministic and invertible within the rounding
/// granularity of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnsignedCoordinate {
    pub x: u32,
    pub y: u32,
}

impl UnsignedCoordinate {
    pub fn from_gps(gps: GpsCoordinate) -> Self {
        let x = (gps.longitude + 180.0) / 360.0;
        let lat = gps.latitude.to_radians();
        let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0;
        Self {
            x: project(x),
            y: project(y),
        }
    }

    pub fn to_gps(self) -> GpsCoordinate {
        let x = self.x as f64 / COORDINATE_SCALE;
        let y = self.y as f64 / COORDINATE_SCALE;
        GpsCoordinate {
            latitude: (PI * (1.0 - 2.0 * y)).sinh().atan().to_degrees(),
            longitude: x * 360.0 - 180.0,
        }
    }
}

/// Maps a normalized 0..1 map unit onto the full u32 range, clamping
/// out-of-range input (latitudes beyond the Mercator cutoff).
fn project(normalized: f64) -> u32 {
    let scaled = normalized * COORDINATE_SCALE;
    if scaled <= 0.0 {
        0
    } else if scaled >= COORDINATE_SCALE - 1.0 {
        u32::MAX
    } else {
        scaled as u32
    }
}

/// Checks whether `point` lies inside `polygon` using the crossing-number
/// algorithm with a ray cast towards positive x.
///
/// Vertex touches are resolved by the half-open edge convention: an edge is
/// hit iff exactly one of its endpoints is strictly above the ray's y. This
/// makes containment deterministic for points sharing a y coordinate with a
/// polygon vertex.
pub fn point_in_polygon(polygon: &[UnsignedCoordinate], point: UnsignedCoordinate) -> bool {
    let px = point.x as f64;
    let py = point.y as f64;
    let mut inside = false;

    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];

        if (a.y > point.y) != (b.y > point.y) {
            let ax = a.x as f64;
            let ay = a.y as f64;
            let bx = b.x as f64;
            let by = b.y as f64;
            let crossing_x = ax + (py - ay) / (by - ay) * (bx - ax);
            if px < crossing_x {
                inside = !inside;
            }
        }
    }

    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTRUM: GpsCoordinate = GpsCoordinate {
        latitude: 52.23024,
        longitude: 21.01062,
    };
    const FALENICA: GpsCoordinate = GpsCoordinate {
        latitude: 52.16125,
        longitude: 21.21147,
    };

    #[test]
    fn distance_to_self_is_zero() {
        assert_eq!(CENTRUM.distance(CENTRUM), 0.0);
    }

    #[test]
    fn distance_one_longitude_milligrade_at_equator() {
        let a = GpsCoordinate::new(0.0, 0.0);
        let b = GpsCoordinate::new(0.0, 0.001);
        // 2 * pi * R / 360 * 0.001
        let d = a.distance(b);
        assert!((d - 111.195).abs() < 0.05, "got {}", d);
    }

    #[test]
    fn distance_centrum_falenica() {
        let d = CENTRUM.distance(FALENICA);
        assert!((d - 15_692.0).abs() < 20.0, "got {}", d);
    }

    #[test]
    fn approximate_distance_close_to_exact_nearby() {
        let exact = CENTRUM.distance(FALENICA);
        let approximate = CENTRUM.approximate_distance(FALENICA);
        assert!(
            (exact - approximate).abs() / exact < 0.01,
            "exact {} vs approximate {}",
            exact,
            approximate,
        );
    }

    #[test]
    fn projection_round_trip() {
        let back = UnsignedCoordinate::from_gps(CENTRUM).to_gps();
        assert!((back.latitude - CENTRUM.latitude).abs() < 1e-5);
        assert!((back.longitude - CENTRUM.longitude).abs() < 1e-5);
    }

    #[test]
    fn projection_is_monotone() {
        let north = UnsignedCoordinate::from_gps(GpsCoordinate::new(53.0, 21.0));
        let south = UnsignedCoordinate::from_gps(GpsCoordinate::new(52.0, 21.0));
        let east = UnsignedCoordinate::from_gps(GpsCoordinate::new(52.0, 22.0));
        assert!(north.y < south.y);
        assert!(south.x < east.x);
    }

    fn square() -> Vec<UnsignedCoordinate> {
        [(10, 10), (20, 10), (20, 20), (10, 20)]
            .iter()
            .map(|&(x, y)| UnsignedCoordinate { x, y })
            .collect()
    }

    #[test]
    fn point_in_polygon_square() {
        let polygon = square();
        assert!(point_in_polygon(
            &polygon,
            UnsignedCoordinate { x: 15, y: 15 }
        ));
        assert!(!point_in_polygon(&polygon, UnsignedCoordinate { x: 5, y: 15 }));
        assert!(!point_in_polygon(
            &polygon,
            UnsignedCoordinate { x: 25, y: 15 }
        ));
        assert!(!point_in_polygon(&polygon, UnsignedCoordinate { x: 15, y: 5 }));
    }

    #[test]
    fn point_in_polygon_vertex_touch() {
        let polygon = square();
        // On the bottom edge: only the right edge is crossed by the ray.
        assert!(point_in_polygon(
            &polygon,
            UnsignedCoordinate { x: 15, y: 10 }
        ));
        // Collinear with the top edge, outside the square.
        assert!(!point_in_polygon(
            &polygon,
            UnsignedCoordinate { x: 25, y: 20 }
        ));
    }
}
