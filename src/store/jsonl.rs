//! jsonl.rs — histórico local en JSONL (una fila por línea)
//!
//! Escritura en modo append; la lectura recorre el fichero línea a línea y
//! descarta las que no parsean. Cuando el fichero pasa de 1,5 × `max_rows`
//! se compacta dejando las `max_rows` más recientes. Pensado para
//! despliegues de una sola instancia.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::Mutex,
};
use tracing::{info, warn};

use super::{is_storable, select, PersistedStore, RecordQuery};
use crate::models::types::PersistedRecord;

pub use super::memory::DEFAULT_MAX_ROWS;

pub struct JsonlStore {
    path: PathBuf,
    max_rows: usize,
    // serializa append y compactación; guarda el nº de líneas una vez contado
    lines: Mutex<Option<usize>>,
}

impl JsonlStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_max_rows(path, DEFAULT_MAX_ROWS)
    }

    pub fn with_max_rows(path: impl AsRef<Path>, max_rows: usize) -> Self {
        Self { path: path.as_ref().to_path_buf(), max_rows: max_rows.max(1), lines: Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open_lines(&self) -> Result<Option<tokio::io::Lines<BufReader<File>>>> {
        match File::open(&self.path).await {
            Ok(f) => Ok(Some(BufReader::new(f).lines())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("leer {}", self.path.display())),
        }
    }

    /// Recorre las filas válidas en orden de fichero.
    async fn scan<F: FnMut(PersistedRecord)>(&self, mut visit: F) -> Result<()> {
        let Some(mut lines) = self.open_lines().await? else { return Ok(()) };
        while let Some(l) = lines.next_line().await? {
            if l.trim().is_empty() {
                continue;
            }
            if let Ok(r) = serde_json::from_str::<PersistedRecord>(&l) {
                visit(r);
            }
        }
        Ok(())
    }

    async fn count_lines(&self) -> Result<usize> {
        let Some(mut lines) = self.open_lines().await? else { return Ok(0) };
        let mut n = 0;
        while let Some(l) = lines.next_line().await? {
            if !l.trim().is_empty() {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Reescribe el fichero con las `max_rows` filas más recientes (orden de inserción).
    async fn compact(&self) -> Result<usize> {
        let mut rows = Vec::new();
        self.scan(|r| rows.push(r)).await?;
        let skip = rows.len().saturating_sub(self.max_rows);
        let mut buf = String::new();
        for r in &rows[skip..] {
            buf.push_str(&serde_json::to_string(r)?);
            buf.push('\n');
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, buf).await.with_context(|| format!("escribir {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).await.with_context(|| format!("renombrar a {}", self.path.display()))?;
        let kept = rows.len() - skip;
        info!("jsonl compactado: {kept} filas ({} descartadas)", skip);
        Ok(kept)
    }
}

#[async_trait]
impl PersistedStore for JsonlStore {
    async fn insert_many(&self, records: &[PersistedRecord]) -> Result<usize> {
        let mut buf = String::new();
        let mut n = 0;
        for r in records.iter().filter(|r| is_storable(r)) {
            match serde_json::to_string(r) {
                Ok(line) => {
                    buf.push_str(&line);
                    buf.push('\n');
                    n += 1;
                }
                Err(e) => warn!("jsonl: registro {} descartado: {e}", r.segment_id),
            }
        }
        if n == 0 {
            return Ok(0);
        }

        let mut lines = self.lines.lock().await;
        let known = match *lines {
            Some(k) => k,
            None => self.count_lines().await?,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.with_context(|| format!("crear {}", dir.display()))?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("abrir {}", self.path.display()))?;
        f.write_all(buf.as_bytes()).await.context("jsonl append")?;
        f.flush().await?;
        drop(f);

        let mut total = known + n;
        if total > self.max_rows + self.max_rows / 2 {
            total = self.compact().await?;
        }
        *lines = Some(total);
        Ok(n)
    }

    async fn find(&self, query: &RecordQuery) -> Result<Vec<PersistedRecord>> {
        let mut hits = Vec::new();
        self.scan(|r| {
            if query.matches(&r) {
                hits.push(r);
            }
        })
        .await?;
        Ok(select(hits.iter(), query))
    }
}
