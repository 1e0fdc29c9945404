//! state.rs — estado mutable por ciudad y registro explícito de ciudades
//!
//! Cada ciudad vive detrás de su propio `RwLock`: un único escritor por
//! ciudad, lectores de ciudades distintas sin bloqueo mutuo.

use std::{collections::HashMap, collections::VecDeque, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::engine::segments::generate_segments;
use crate::engine::snapshot::{build_snapshot, NoiseSource, RandNoise};
use crate::models::types::{City, Segment, Snapshot};

pub const HISTORY_CAP: usize = 500;

pub struct CityState {
    city: City,
    segments: Vec<Segment>,
    history: VecDeque<Snapshot>,
    cap: usize,
    last_snapshot: Option<Snapshot>,
    last_tick: Option<DateTime<Utc>>,
    noise: Box<dyn NoiseSource>,
}

impl CityState {
    pub fn new(city: City, seed: u32, cap: usize, noise: Box<dyn NoiseSource>) -> Self {
        let cap = cap.max(1);
        Self {
            city,
            segments: generate_segments(city, seed),
            history: VecDeque::with_capacity(cap),
            cap,
            last_snapshot: None,
            last_tick: None,
            noise,
        }
    }

    pub fn city(&self) -> City {
        self.city
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    /// Orden cronológico: el más antiguo delante.
    pub fn history(&self) -> &VecDeque<Snapshot> {
        &self.history
    }

    /// Snapshot del buffer con ese timestamp exacto (búsqueda binaria).
    pub fn snapshot_at(&self, at: DateTime<Utc>) -> Option<&Snapshot> {
        self.history
            .binary_search_by_key(&at, |s| s.timestamp)
            .ok()
            .and_then(|i| self.history.get(i))
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.last_tick
    }

    /// Añade al buffer (FIFO acotado) y lo marca como último.
    pub fn push(&mut self, snapshot: Snapshot) {
        while self.history.len() >= self.cap {
            self.history.pop_front();
        }
        self.last_snapshot = Some(snapshot.clone());
        self.history.push_back(snapshot);
    }

    /// Snapshot simulado que no entra en el buffer (predicción en frío).
    pub fn simulate(&mut self, at: DateTime<Utc>) -> Snapshot {
        build_snapshot(self.city, &self.segments, at, self.noise.as_mut())
    }

    /// Un paso del scheduler: construir, guardar y devolver copia para persistir.
    pub fn advance(&mut self, at: DateTime<Utc>) -> Snapshot {
        let snap = self.simulate(at);
        self.push(snap.clone());
        self.last_tick = Some(at);
        snap
    }
}

pub type SharedCity = Arc<RwLock<CityState>>;

/// Registro de las tres ciudades canónicas, creado una vez al arrancar.
pub struct CityRegistry {
    cities: HashMap<City, SharedCity>,
}

impl CityRegistry {
    pub fn new(seed_offset: u32, cap: usize) -> Self {
        Self::with_noise(seed_offset, cap, |_| Box::new(RandNoise::from_entropy()))
    }

    pub fn with_noise<F>(seed_offset: u32, cap: usize, mut noise: F) -> Self
    where
        F: FnMut(City) -> Box<dyn NoiseSource>,
    {
        let cities = City::ALL
            .into_iter()
            .map(|c| {
                let seed = c.seed().wrapping_add(seed_offset);
                let st = CityState::new(c, seed, cap, noise(c));
                (c, Arc::new(RwLock::new(st)))
            })
            .collect();
        Self { cities }
    }

    pub fn get(&self, city: City) -> SharedCity {
        // Todas las ciudades están pre-cargadas; `City` no admite otros valores.
        self.cities[&city].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rng::XorShift32;
    use crate::engine::segments::SEGMENT_COUNT;
    use chrono::Duration;

    fn state(cap: usize) -> CityState {
        CityState::new(City::Bangalore, 1337, cap, Box::new(XorShift32::new(1)))
    }

    #[test]
    fn history_is_bounded_fifo() {
        let mut st = state(HISTORY_CAP);
        let t0 = Utc::now();
        for i in 0..(HISTORY_CAP + 37) {
            st.advance(t0 + Duration::seconds(i as i64 * 10));
            assert!(st.history().len() <= HISTORY_CAP);
        }
        assert_eq!(st.history().len(), HISTORY_CAP);
        // los 37 primeros ya no están
        assert_eq!(st.history().front().unwrap().timestamp, t0 + Duration::seconds(370));
        let last = st.history().back().unwrap();
        assert_eq!(st.last_snapshot().unwrap(), last);
        assert!(st.history().iter().zip(st.history().iter().skip(1)).all(|(a, b)| a.timestamp < b.timestamp));
    }

    #[test]
    fn simulate_does_not_touch_history() {
        let mut st = state(10);
        let s = st.simulate(Utc::now());
        assert_eq!(s.features.len(), SEGMENT_COUNT);
        assert!(st.history().is_empty());
        assert!(st.last_snapshot().is_none());
        assert!(st.last_tick().is_none());
    }

    #[test]
    fn snapshot_at_finds_exact_timestamp() {
        let mut st = state(10);
        let t0 = Utc::now();
        for i in 0..4 {
            st.advance(t0 + Duration::seconds(i * 10));
        }
        let hit = st.snapshot_at(t0 + Duration::seconds(20)).unwrap();
        assert_eq!(hit.timestamp, t0 + Duration::seconds(20));
        assert!(st.snapshot_at(t0 + Duration::seconds(5)).is_none());
    }

    #[test]
    fn push_is_not_a_tick() {
        let mut st = state(10);
        let s = st.simulate(Utc::now());
        st.push(s);
        assert_eq!(st.history().len(), 1);
        assert!(st.last_tick().is_none());
    }

    #[test]
    fn segment_count_fixed() {
        let mut st = state(5);
        for _ in 0..20 {
            st.advance(Utc::now());
        }
        assert_eq!(st.segments().len(), SEGMENT_COUNT);
        assert!(st.segment("bangalore-042").is_some());
    }

    #[tokio::test]
    async fn registry_has_all_cities() {
        let reg = CityRegistry::with_noise(0, 10, |_| Box::new(XorShift32::new(5)));
        for c in City::ALL {
            let st = reg.get(c);
            let st = st.read().await;
            assert_eq!(st.city(), c);
            assert_eq!(st.segments().len(), SEGMENT_COUNT);
        }
    }

    #[tokio::test]
    async fn seed_offset_changes_network() {
        let a = CityRegistry::with_noise(0, 10, |_| Box::new(XorShift32::new(5)));
        let b = CityRegistry::with_noise(1, 10, |_| Box::new(XorShift32::new(5)));
        let sa = a.get(City::Mumbai);
        let sb = b.get(City::Mumbai);
        let (sa, sb) = (sa.read().await, sb.read().await);
        assert_ne!(sa.segments(), sb.segments());
    }
}
