//! memory.rs — store en memoria (por defecto y para tests)
//!
//! Acotado por número de filas: al superar el tope se descartan las más
//! antiguas en orden de inserción.

use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{is_storable, select, PersistedStore, RecordQuery};
use crate::models::types::PersistedRecord;

/// ~3,8 h de las tres ciudades a un tick cada 10 s
pub const DEFAULT_MAX_ROWS: usize = 500_000;

pub struct MemoryStore {
    rows: RwLock<VecDeque<PersistedRecord>>,
    max_rows: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_max_rows(DEFAULT_MAX_ROWS)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rows(max_rows: usize) -> Self {
        Self { rows: RwLock::new(VecDeque::new()), max_rows: max_rows.max(1) }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl PersistedStore for MemoryStore {
    async fn insert_many(&self, records: &[PersistedRecord]) -> Result<usize> {
        let mut rows = self.rows.write().await;
        let mut n = 0;
        for r in records.iter().filter(|r| is_storable(r)) {
            rows.push_back(r.clone());
            n += 1;
        }
        let excess = rows.len().saturating_sub(self.max_rows);
        rows.drain(..excess);
        Ok(n)
    }

    async fn find(&self, query: &RecordQuery) -> Result<Vec<PersistedRecord>> {
        let rows = self.rows.read().await;
        Ok(select(rows.iter(), query))
    }
}
