//! Spherical geometry for placement.

use swarmgrid_state::Coordinates;

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// A location weighted by observed demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationWeight {
    pub coordinates: Coordinates,
    pub weight: f64,
}

impl LocationWeight {
    pub fn new(latitude: f64, longitude: f64, weight: f64) -> Self {
        Self {
            coordinates: Coordinates::new(latitude, longitude),
            weight,
        }
    }
}

/// Demand-weighted geographic midpoint.
///
/// Each sample is projected onto the unit sphere, the weighted mean vector
/// is taken, and the result is projected back to latitude/longitude. This
/// stays correct across the antimeridian and near the poles, where a mean
/// of raw longitudes is not.
///
/// Returns `None` for an empty sample set or a non-positive total weight.
/// Samples with a non-positive weight are ignored.
pub fn weighted_midpoint(samples: &[LocationWeight]) -> Option<Coordinates> {
    let (mut x, mut y, mut z, mut total) = (0.0, 0.0, 0.0, 0.0);
    for sample in samples.iter().filter(|s| s.weight > 0.0) {
        let lat = sample.coordinates.latitude.to_radians();
        let lon = sample.coordinates.longitude.to_radians();
        x += sample.weight * lat.cos() * lon.cos();
        y += sample.weight * lat.cos() * lon.sin();
        z += sample.weight * lat.sin();
        total += sample.weight;
    }
    if total <= 0.0 {
        return None;
    }
    let (x, y, z) = (x / total, y / total, z / total);
    let longitude = y.atan2(x);
    let latitude = z.atan2(x.hypot(y));
    Some(Coordinates::new(latitude.to_degrees(), longitude.to_degrees()))
}

/// Great-circle distance between two points.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}
