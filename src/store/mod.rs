//! store — contrato del almacén persistente y sus implementaciones
//!
//! El motor solo necesita insertar en lote (best-effort, sin orden) y
//! consultar por ciudad/rango con límite, ordenado por timestamp descendente.

pub mod gateway;
pub mod jsonl;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::types::{City, PersistedRecord};

pub use gateway::PersistenceGateway;
pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

#[derive(Clone, Debug)]
pub struct RecordQuery {
    pub city: City,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl RecordQuery {
    pub fn latest(city: City, limit: usize) -> Self {
        Self { city, from: None, to: None, limit }
    }

    pub fn range(city: City, from: DateTime<Utc>, to: DateTime<Utc>, limit: usize) -> Self {
        Self { city, from: Some(from), to: Some(to), limit }
    }

    pub fn matches(&self, r: &PersistedRecord) -> bool {
        r.city == self.city
            && self.from.map_or(true, |f| r.timestamp >= f)
            && self.to.map_or(true, |t| r.timestamp <= t)
    }
}

#[async_trait]
pub trait PersistedStore: Send + Sync {
    /// Inserta sin orden: un registro malo no aborta el resto. Devuelve los insertados.
    async fn insert_many(&self, records: &[PersistedRecord]) -> Result<usize>;

    /// Registros que casan con la consulta, más recientes primero.
    async fn find(&self, query: &RecordQuery) -> Result<Vec<PersistedRecord>>;
}

/// Un registro es almacenable si sus valores son finitos.
pub(crate) fn is_storable(r: &PersistedRecord) -> bool {
    r.avg_speed.is_finite() && r.congestion_level.is_finite() && r.coordinates().is_some()
}

/// Filtra y ordena referencias; solo se clonan las `limit` filas devueltas.
pub(crate) fn select<'a, I>(rows: I, query: &RecordQuery) -> Vec<PersistedRecord>
where
    I: IntoIterator<Item = &'a PersistedRecord>,
{
    let mut hits: Vec<&PersistedRecord> = rows.into_iter().filter(|r| query.matches(r)).collect();
    hits.sort_unstable_by(|a, b| b.timestamp.cmp(&a.timestamp));
    hits.into_iter().take(query.limit).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::Feature;
    use chrono::Duration;

    fn rec(city: City, at: DateTime<Utc>) -> PersistedRecord {
        let f = Feature {
            id: "bangalore-000".into(),
            coordinates: [[77.5, 12.9], [77.51, 12.91]],
            speed_kph: 33.0,
            density_vpkm: 21.0,
            congestion: 0.5,
        };
        PersistedRecord::from_feature(city, at, &f)
    }

    #[test]
    fn select_returns_newest_within_limit() {
        let t0 = Utc::now();
        let rows: Vec<_> = (0..50)
            .map(|i| rec(if i % 2 == 0 { City::Bangalore } else { City::Delhi }, t0 + Duration::seconds(i)))
            .collect();
        let out = select(rows.iter(), &RecordQuery::latest(City::Bangalore, 3));
        let secs: Vec<i64> = out.iter().map(|r| (r.timestamp - t0).num_seconds()).collect();
        assert_eq!(secs, vec![48, 46, 44]);
        assert!(select(rows.iter(), &RecordQuery::latest(City::Mumbai, 3)).is_empty());
    }
}
