//! gateway.rs — escritura "dispara y olvida" hacia el store
//!
//! `submit` convierte el snapshot en filas y las encola en un canal sin
//! límite; un worker en segundo plano las inserta. Entrega como mucho una
//! vez y sin garantías: los fallos se registran y se descartan.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::PersistedStore;
use crate::models::types::{PersistedRecord, Snapshot};

#[derive(Clone)]
pub struct PersistenceGateway {
    tx: mpsc::UnboundedSender<Vec<PersistedRecord>>,
}

impl PersistenceGateway {
    /// Lanza el worker; necesita un runtime tokio activo.
    pub fn spawn(store: Arc<dyn PersistedStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PersistedRecord>>();
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                match store.insert_many(&batch).await {
                    Ok(n) if n < batch.len() => {
                        warn!("persistencia parcial: {n}/{} filas insertadas", batch.len())
                    }
                    Ok(n) => debug!("persistidas {n} filas"),
                    Err(e) => warn!("persistencia descartada ({} filas): {e:?}", batch.len()),
                }
            }
            debug!("gateway de persistencia cerrado");
        });
        Self { tx }
    }

    /// No espera a la escritura.
    pub fn submit(&self, snapshot: &Snapshot) {
        let records = records_from_snapshot(snapshot);
        if records.is_empty() {
            return;
        }
        if self.tx.send(records).is_err() {
            warn!("gateway sin worker, snapshot de {} descartado", snapshot.city);
        }
    }
}

/// Una fila por feature del snapshot
pub fn records_from_snapshot(snapshot: &Snapshot) -> Vec<PersistedRecord> {
    snapshot
        .features
        .iter()
        .map(|f| PersistedRecord::from_feature(snapshot.city, snapshot.timestamp, f))
        .collect()
}
