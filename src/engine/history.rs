//! history.rs — agregados históricos por tramo
//!
//! Prioridad: store persistente (si devuelve al menos una fila) y, si no,
//! el buffer en memoria. Ambos caminos producen la misma forma de respuesta.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::engine::snapshot::{density_from_congestion, round2, round3};
use crate::engine::state::{CityRegistry, CityState};
use crate::error::TrafficError;
use crate::models::types::{City, HistoryResponse, PersistedRecord, SegmentHistory, Snapshot};
use crate::store::{PersistedStore, RecordQuery};

pub const DEFAULT_WINDOW_MIN: i64 = 60;
/// Filas por consulta al store al recorrer una ventana larga
pub const STORE_PAGE: usize = 10_000;

/// RFC 3339 o epoch en milisegundos.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TrafficError> {
    let t = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.with_timezone(&Utc));
    }
    if !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()) {
        if let Some(dt) = t.parse::<i64>().ok().and_then(DateTime::<Utc>::from_timestamp_millis) {
            return Ok(dt);
        }
    }
    Err(TrafficError::InvalidTimestamp(raw.to_string()))
}

/// Ventana [from, to]; sin ninguno, la última hora. Con uno solo, 60 min hacia el otro lado.
pub fn resolve_window(
    from: Option<&str>,
    to: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), TrafficError> {
    let from = from.filter(|s| !s.trim().is_empty()).map(parse_timestamp).transpose()?;
    let to = to.filter(|s| !s.trim().is_empty()).map(parse_timestamp).transpose()?;
    let window = Duration::minutes(DEFAULT_WINDOW_MIN);
    let (from, to) = match (from, to) {
        (Some(f), Some(t)) => (f, t),
        (Some(f), None) => (f, f + window),
        (None, Some(t)) => (t - window, t),
        (None, None) => (now - window, now),
    };
    if from > to {
        return Err(TrafficError::InvalidRange { from: from.to_rfc3339(), to: to.to_rfc3339() });
    }
    Ok((from, to))
}

#[derive(Default)]
struct Acc {
    coordinates: [[f64; 2]; 2],
    speed: f64,
    density: f64,
    congestion: f64,
    n: usize,
}

impl Acc {
    fn add(&mut self, speed: f64, density: f64, congestion: f64) {
        self.speed += speed;
        self.density += density;
        self.congestion += congestion;
        self.n += 1;
    }

    fn finish(self, id: String) -> SegmentHistory {
        let n = self.n as f64;
        SegmentHistory {
            id,
            coordinates: self.coordinates,
            avg_speed_kph: round2(self.speed / n),
            avg_density_vpkm: Some(round2(self.density / n)),
            avg_congestion: round3(self.congestion / n),
            samples: self.n,
        }
    }
}

/// Agregado incremental de filas persistidas; admite varias páginas.
/// La densidad sale del buffer si hay snapshot con el mismo timestamp y,
/// si no, de invertir la fórmula de congestión.
#[derive(Default)]
pub struct RecordAggregate {
    by_seg: BTreeMap<String, Acc>,
    stamps: HashSet<DateTime<Utc>>,
}

impl RecordAggregate {
    pub fn add(&mut self, rows: &[PersistedRecord], buffer: Option<&CityState>) {
        for r in rows {
            let Some(coordinates) = r.coordinates() else { continue };
            self.stamps.insert(r.timestamp);
            let density = buffer
                .and_then(|st| st.snapshot_at(r.timestamp))
                .and_then(|s| s.feature(&r.segment_id))
                .map(|f| f.density_vpkm)
                .unwrap_or_else(|| density_from_congestion(r.avg_speed, r.congestion_level));
            self.by_seg
                .entry(r.segment_id.clone())
                .or_insert_with(|| Acc { coordinates, ..Acc::default() })
                .add(r.avg_speed, density, r.congestion_level);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn finish(self, city: City, from: DateTime<Utc>, to: DateTime<Utc>) -> HistoryResponse {
        let segments = self.by_seg.into_iter().map(|(id, a)| a.finish(id)).collect();
        HistoryResponse { city, from, to, count: self.stamps.len(), segments }
    }
}

/// Agregado desde el buffer en memoria para la ventana dada.
pub fn aggregate_snapshots<'a, I>(
    city: City,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    history: I,
) -> HistoryResponse
where
    I: IntoIterator<Item = &'a Snapshot>,
{
    let mut by_seg: BTreeMap<String, Acc> = BTreeMap::new();
    let mut count = 0;
    for s in history.into_iter().filter(|s| s.timestamp >= from && s.timestamp <= to) {
        count += 1;
        for f in &s.features {
            by_seg
                .entry(f.id.clone())
                .or_insert_with(|| Acc { coordinates: f.coordinates, ..Acc::default() })
                .add(f.speed_kph, f.density_vpkm, f.congestion);
        }
    }
    let segments = by_seg.into_iter().map(|(id, a)| a.finish(id)).collect();
    HistoryResponse { city, from, to, count, segments }
}

pub struct HistoryAggregator {
    registry: Arc<CityRegistry>,
    store: Option<Arc<dyn PersistedStore>>,
    page: usize,
}

impl HistoryAggregator {
    pub fn new(registry: Arc<CityRegistry>, store: Option<Arc<dyn PersistedStore>>) -> Self {
        Self { registry, store, page: STORE_PAGE }
    }

    #[cfg(test)]
    fn with_page(mut self, page: usize) -> Self {
        self.page = page.max(1);
        self
    }

    /// Recorre la ventana hacia atrás en páginas de `page` filas. Las filas del
    /// timestamp más antiguo de una página llena se descartan y se vuelven a
    /// pedir completas en la siguiente.
    async fn from_store(
        &self,
        store: &dyn PersistedStore,
        city: City,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<RecordAggregate> {
        let shared = self.registry.get(city);
        let mut agg = RecordAggregate::default();
        let mut upper = to;
        let mut pages = 0usize;
        loop {
            let rows = store.find(&RecordQuery::range(city, from, upper, self.page)).await?;
            pages += 1;
            let Some(oldest) = rows.last().map(|r| r.timestamp) else { break };
            let full = rows.len() >= self.page;
            let cut = if full { rows.iter().position(|r| r.timestamp <= oldest).unwrap_or(0) } else { rows.len() };
            {
                let st = shared.read().await;
                // Página entera en un solo instante: se acepta tal cual.
                let page = if cut == 0 { &rows[..] } else { &rows[..cut] };
                agg.add(page, Some(&*st));
            }
            if !full {
                break;
            }
            upper = if cut == 0 { oldest - Duration::milliseconds(1) } else { oldest };
            if upper < from {
                break;
            }
        }
        debug!("history {city}: {pages} páginas del store");
        Ok(agg)
    }

    pub async fn get_history(&self, city: City, from: DateTime<Utc>, to: DateTime<Utc>) -> HistoryResponse {
        if let Some(store) = &self.store {
            match self.from_store(store.as_ref(), city, from, to).await {
                Ok(agg) if !agg.is_empty() => return agg.finish(city, from, to),
                Ok(_) => debug!("history {city}: store vacío, uso el buffer"),
                Err(e) => warn!("history {city}: {}", TrafficError::Persistence(format!("{e:#}"))),
            }
        }
        let st = self.registry.get(city);
        let st = st.read().await;
        aggregate_snapshots(city, from, to, st.history())
    }
}
