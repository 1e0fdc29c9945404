//! segments.rs — red de tramos sintética por ciudad
//!
//! 120 tramos dentro de la bbox de la ciudad, el segundo extremo a ~1 km del
//! primero. Reproducible bit a bit para una semilla dada.

use crate::engine::rng::XorShift32;
use crate::engine::snapshot::round2;
use crate::models::types::{City, Segment};

pub const SEGMENT_COUNT: usize = 120;

/// ~1 km en grados a estas latitudes
const OFFSET_DEG: f64 = 0.01;

#[inline]
fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

pub fn generate_segments(city: City, seed: u32) -> Vec<Segment> {
    let mut rng = XorShift32::new(seed);
    let ([min_lng, min_lat], [max_lng, max_lat]) = city.bbox();
    let prefix = city.as_str().to_lowercase();

    (0..SEGMENT_COUNT)
        .map(|i| {
            let lng0 = rng.range(min_lng, max_lng);
            let lat0 = rng.range(min_lat, max_lat);
            let lng1 = (lng0 + rng.range(-OFFSET_DEG, OFFSET_DEG)).clamp(min_lng, max_lng);
            let lat1 = (lat0 + rng.range(-OFFSET_DEG, OFFSET_DEG)).clamp(min_lat, max_lat);
            let base_speed_kph = round2(rng.range(30.0, 70.0));
            let base_density_vpkm = round2(rng.range(10.0, 50.0));
            Segment {
                id: format!("{prefix}-{i:03}"),
                coordinates: [[round6(lng0), round6(lat0)], [round6(lng1), round6(lat1)]],
                base_speed_kph,
                base_density_vpkm,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_is_byte_identical() {
        let a = generate_segments(City::Bangalore, 1337);
        let b = generate_segments(City::Bangalore, 1337);
        assert_eq!(a.len(), SEGMENT_COUNT);
        assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
    }

    #[test]
    fn different_seed_differs() {
        let a = generate_segments(City::Delhi, 1);
        let b = generate_segments(City::Delhi, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn inside_bbox_and_ranges() {
        for city in City::ALL {
            let ([x0, y0], [x1, y1]) = city.bbox();
            for s in generate_segments(city, city.seed()) {
                for [lng, lat] in s.coordinates {
                    assert!(lng >= x0 - 1e-6 && lng <= x1 + 1e-6, "{} lng {lng}", s.id);
                    assert!(lat >= y0 - 1e-6 && lat <= y1 + 1e-6, "{} lat {lat}", s.id);
                }
                assert!(s.base_speed_kph >= 30.0 && s.base_speed_kph <= 70.0);
                assert!(s.base_density_vpkm >= 10.0 && s.base_density_vpkm <= 50.0);
                let [[a, b], [c, d]] = s.coordinates;
                assert!((a - c).abs() <= OFFSET_DEG + 1e-6 && (b - d).abs() <= OFFSET_DEG + 1e-6);
            }
        }
    }

    #[test]
    fn ids_are_stable_and_unique() {
        let segs = generate_segments(City::Mumbai, 2024);
        assert_eq!(segs[0].id, "mumbai-000");
        assert_eq!(segs[119].id, "mumbai-119");
        let mut ids: Vec<_> = segs.iter().map(|s| s.id.clone()).collect();
        ids.dedup();
        assert_eq!(ids.len(), SEGMENT_COUNT);
    }
}
