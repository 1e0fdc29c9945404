//! scheduler.rs — tick periódico de simulación
//!
//! Un único timer para todas las ciudades. En cada tick, cada ciudad simulada
//! avanza en su propia tarea; la persistencia se encola sin esperar. Un fallo
//! en una ciudad se registra y el ticker sigue.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::{
    task::{JoinHandle, JoinSet},
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::TrafficEngine;
use crate::models::types::City;

#[derive(Debug, Default)]
pub struct SchedulerStats {
    ticks: AtomicU64,
}

impl SchedulerStats {
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }
}

impl TrafficEngine {
    /// Un tick completo. Devuelve las ciudades que avanzaron.
    pub async fn tick(&self, at: DateTime<Utc>) -> Vec<City> {
        let mut set = JoinSet::new();
        for city in City::ALL.into_iter().filter(|c| !self.is_live(*c)) {
            let shared = self.registry.get(city);
            let gateway = self.gateway.clone();
            set.spawn(async move {
                let snap = shared.write().await.advance(at);
                if let Some(gw) = gateway {
                    gw.submit(&snap);
                }
                city
            });
        }

        let mut advanced = Vec::with_capacity(City::ALL.len());
        while let Some(res) = set.join_next().await {
            match res {
                Ok(city) => advanced.push(city),
                Err(e) => warn!("tick: tarea de ciudad fallida: {e}"),
            }
        }
        advanced.sort();
        self.stats.record_tick();
        advanced
    }
}

pub fn spawn_scheduler(engine: Arc<TrafficEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut iv = interval(period);
        iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("scheduler cada {:?}", period);
        loop {
            iv.tick().await;
            let advanced = engine.tick(Utc::now()).await;
            debug!("tick #{}: {:?}", engine.stats().tick_count(), advanced);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rng::XorShift32;
    use crate::engine::state::{CityRegistry, HISTORY_CAP};
    use crate::models::types::{PersistedRecord, Segment, Snapshot};
    use crate::server::live::LiveDataProvider;
    use crate::store::{MemoryStore, PersistedStore, RecordQuery};
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    fn engine() -> TrafficEngine {
        TrafficEngine::new(CityRegistry::with_noise(0, HISTORY_CAP, |_| Box::new(XorShift32::new(8))))
    }

    struct NeverProvider;

    #[async_trait]
    impl LiveDataProvider for NeverProvider {
        async fn fetch(&self, _city: City, _segments: &[Segment]) -> Result<Snapshot> {
            bail!("sin red")
        }
    }

    /// Store que tarda mucho en escribir: el tick no debe esperarlo.
    struct SlowStore;

    #[async_trait]
    impl PersistedStore for SlowStore {
        async fn insert_many(&self, _r: &[PersistedRecord]) -> Result<usize> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            bail!("demasiado tarde")
        }
        async fn find(&self, _q: &RecordQuery) -> Result<Vec<PersistedRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn tick_advances_every_city() {
        let e = engine();
        let at = Utc::now();
        assert_eq!(e.tick(at).await, City::ALL.to_vec());
        assert_eq!(e.stats().tick_count(), 1);
        for c in City::ALL {
            let st = e.registry().get(c);
            let st = st.read().await;
            assert_eq!(st.history().len(), 1);
            assert_eq!(st.last_tick(), Some(at));
        }
    }

    #[tokio::test]
    async fn history_never_exceeds_cap() {
        let e = engine();
        let t0 = Utc::now();
        for i in 0..(HISTORY_CAP as i64 + 20) {
            e.tick(t0 + chrono::Duration::seconds(i * 10)).await;
        }
        let st = e.registry().get(City::Delhi);
        let st = st.read().await;
        assert_eq!(st.history().len(), HISTORY_CAP);
        assert_eq!(st.history().front().unwrap().timestamp, t0 + chrono::Duration::seconds(200));
    }

    #[tokio::test]
    async fn live_cities_are_skipped() {
        let e = engine().with_live(Arc::new(NeverProvider), vec![City::Mumbai], Duration::from_millis(10));
        let advanced = e.tick(Utc::now()).await;
        assert_eq!(advanced, vec![City::Bangalore, City::Delhi]);
        assert!(e.registry().get(City::Mumbai).read().await.history().is_empty());
    }

    #[tokio::test]
    async fn slow_store_does_not_block_tick() {
        let e = engine().with_store(Arc::new(SlowStore));
        let started = std::time::Instant::now();
        for _ in 0..5 {
            e.tick(Utc::now()).await;
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(e.stats().tick_count(), 5);
    }

    #[tokio::test]
    async fn ticks_reach_the_store() {
        let store = Arc::new(MemoryStore::new());
        let e = engine().with_store(store.clone());
        e.tick(Utc::now()).await;
        for _ in 0..100 {
            if store.len().await == 360 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.len().await, 360);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_scheduler_keeps_ticking() {
        let e = Arc::new(engine());
        let handle = spawn_scheduler(e.clone(), Duration::from_secs(10));
        // el primer tick de `interval` es inmediato
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(e.stats().tick_count() >= 3);
        handle.abort();
    }
}
