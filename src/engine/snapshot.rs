//! snapshot.rs — construcción de un snapshot simulado
//!
//! Por tramo: densidad = base × (0.6 + intensidad + ruido), velocidad derivada
//! de la densidad y congestión combinando ambas. La única fuente no pura es
//! el ruido, que se inyecta vía `NoiseSource`.

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::engine::{pattern, rng::XorShift32};
use crate::models::types::{City, Feature, Segment, Snapshot, Source};

pub const NOISE_AMPLITUDE: f64 = 0.15;
pub const VALUE_FLOOR: f64 = 5.0;

/// Fuente de ruido en [-0.15, 0.15)
pub trait NoiseSource: Send + Sync {
    fn noise(&mut self) -> f64;
}

/// Ruido de producción (entropía del sistema)
pub struct RandNoise(StdRng);

impl RandNoise {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl NoiseSource for RandNoise {
    fn noise(&mut self) -> f64 {
        self.0.gen_range(-NOISE_AMPLITUDE..NOISE_AMPLITUDE)
    }
}

impl NoiseSource for XorShift32 {
    fn noise(&mut self) -> f64 {
        self.range(-NOISE_AMPLITUDE, NOISE_AMPLITUDE)
    }
}

/// Ruido constante (tests)
#[derive(Clone, Copy, Debug)]
pub struct ConstNoise(pub f64);

impl NoiseSource for ConstNoise {
    fn noise(&mut self) -> f64 {
        self.0
    }
}

#[inline]
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[inline]
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[inline]
pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

/// Velocidad a partir de la densidad; nunca por debajo del suelo.
pub fn derive_speed(base_speed: f64, base_density: f64, density: f64) -> f64 {
    (base_speed * (1.25 - 0.65 * density / (base_density + 30.0))).max(VALUE_FLOOR)
}

/// Congestión en [0,1] para cualquier entrada, incluidas 0 e infinitos.
pub fn congestion(speed: f64, density: f64) -> f64 {
    clamp01(round3((density / 80.0 + (1.0 - speed / 80.0)) / 2.0))
}

/// Inversa de la fórmula de congestión, para filas persistidas sin densidad.
pub fn density_from_congestion(speed: f64, congestion: f64) -> f64 {
    (160.0 * congestion - 80.0 + speed).max(VALUE_FLOOR)
}

pub fn build_feature(segment: &Segment, intensity: f64, noise: f64) -> Feature {
    let density = (segment.base_density_vpkm * (0.6 + intensity + noise)).max(VALUE_FLOOR);
    let speed = derive_speed(segment.base_speed_kph, segment.base_density_vpkm, density);
    Feature {
        id: segment.id.clone(),
        coordinates: segment.coordinates,
        speed_kph: round2(speed),
        density_vpkm: round2(density),
        congestion: congestion(speed, density),
    }
}

pub fn build_snapshot(
    city: City,
    segments: &[Segment],
    at: DateTime<Utc>,
    noise: &mut dyn NoiseSource,
) -> Snapshot {
    let k = pattern::intensity_at(at);
    let features = segments.iter().map(|s| build_feature(s, k, noise.noise())).collect();
    Snapshot {
        city,
        timestamp: at,
        features,
        incidents: Vec::new(),
        source: Source::Simulated,
    }
}
