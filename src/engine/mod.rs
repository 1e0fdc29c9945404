//! engine — motor de estado de tráfico
//!
//! `TrafficEngine` es la única instancia de larga vida: posee el registro de
//! ciudades, el store opcional con su gateway de escritura y el proveedor
//! live opcional. Los handlers HTTP y el scheduler trabajan sobre él.

pub mod history;
pub mod pattern;
pub mod predict;
pub mod rng;
pub mod scheduler;
pub mod segments;
pub mod snapshot;
pub mod state;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::TrafficError;
use crate::models::types::{
    City, CityTick, HistoryResponse, PredictionResponse, SelfTestReport, Snapshot,
};
use crate::server::live::LiveDataProvider;
use crate::store::{PersistedStore, PersistenceGateway};

use history::HistoryAggregator;
use predict::TrendPredictor;
use scheduler::SchedulerStats;
use state::CityRegistry;

struct LiveSource {
    provider: Arc<dyn LiveDataProvider>,
    cities: Vec<City>,
    timeout: Duration,
}

pub struct TrafficEngine {
    registry: Arc<CityRegistry>,
    gateway: Option<PersistenceGateway>,
    live: Option<LiveSource>,
    stats: SchedulerStats,
    history: HistoryAggregator,
    predictor: TrendPredictor,
}

impl TrafficEngine {
    pub fn new(registry: CityRegistry) -> Self {
        let registry = Arc::new(registry);
        Self {
            history: HistoryAggregator::new(registry.clone(), None),
            predictor: TrendPredictor::new(registry.clone(), None),
            registry,
            gateway: None,
            live: None,
            stats: SchedulerStats::default(),
        }
    }

    /// Conecta el store: lecturas de history/predict y worker de escritura.
    /// Necesita un runtime tokio activo.
    pub fn with_store(mut self, store: Arc<dyn PersistedStore>) -> Self {
        self.history = HistoryAggregator::new(self.registry.clone(), Some(store.clone()));
        self.predictor = TrendPredictor::new(self.registry.clone(), Some(store.clone()));
        self.gateway = Some(PersistenceGateway::spawn(store));
        self
    }

    pub fn with_live(mut self, provider: Arc<dyn LiveDataProvider>, cities: Vec<City>, timeout: Duration) -> Self {
        if !cities.is_empty() {
            self.live = Some(LiveSource { provider, cities, timeout });
        }
        self
    }

    pub fn registry(&self) -> &CityRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// La ciudad se sirve desde el proveedor externo (el scheduler la salta).
    pub fn is_live(&self, city: City) -> bool {
        self.live.as_ref().is_some_and(|l| l.cities.contains(&city))
    }

    fn persist(&self, snapshot: &Snapshot) {
        if let Some(gw) = &self.gateway {
            gw.submit(snapshot);
        }
    }

    async fn fetch_live(&self, city: City) -> Result<Snapshot, TrafficError> {
        let live = self
            .live
            .as_ref()
            .filter(|l| l.cities.contains(&city))
            .ok_or_else(|| TrafficError::Upstream(format!("{city} no está en modo live")))?;
        let segments = self.registry.get(city).read().await.segments().to_vec();
        match timeout(live.timeout, live.provider.fetch(city, &segments)).await {
            Ok(Ok(snap)) => Ok(snap),
            Ok(Err(e)) => Err(TrafficError::Upstream(format!("{e:#}"))),
            Err(_) => Err(TrafficError::Upstream(format!("timeout tras {:?}", live.timeout))),
        }
    }

    /// Snapshot actual. En modo live se intenta el proveedor una vez; si falla,
    /// esa petición recibe una simulación construida en el momento.
    pub async fn live_snapshot(&self, city: City, now: DateTime<Utc>) -> Snapshot {
        let shared = self.registry.get(city);
        if self.is_live(city) {
            let snap = match self.fetch_live(city).await {
                Ok(snap) => snap,
                Err(e) => {
                    warn!("live {city}: {e}; sirvo simulación");
                    // el scheduler no avanza esta ciudad: nada de caché ni buffer
                    shared.write().await.simulate(now)
                }
            };
            self.persist(&snap);
            return snap;
        }

        if let Some(last) = shared.read().await.last_snapshot() {
            return last.clone();
        }
        // Aún no hubo tick para esta ciudad: se construye bajo demanda.
        // No cuenta como tick (`last_tick` solo lo fija el scheduler).
        let snap = {
            let mut st = shared.write().await;
            if let Some(last) = st.last_snapshot().cloned() {
                return last;
            }
            let snap = st.simulate(now);
            st.push(snap.clone());
            snap
        };
        debug!("live {city}: snapshot bajo demanda");
        self.persist(&snap);
        snap
    }

    pub async fn history(&self, city: City, from: DateTime<Utc>, to: DateTime<Utc>) -> HistoryResponse {
        self.history.get_history(city, from, to).await
    }

    pub async fn predict(&self, city: City, horizon_minutes: u32, now: DateTime<Utc>) -> PredictionResponse {
        self.predictor.predict(city, horizon_minutes, now).await
    }

    pub async fn self_test(&self, now: DateTime<Utc>) -> SelfTestReport {
        let mut cities = BTreeMap::new();
        for city in City::ALL {
            let last = self.registry.get(city).read().await.last_tick();
            cities.insert(city.to_string(), CityTick { last_tick_timestamp: last });
        }
        SelfTestReport {
            server_timestamp: now,
            mode: if self.live.is_some() { "live" } else { "simulated" }.to_string(),
            tick_count: self.stats.tick_count(),
            cities,
        }
    }
}
