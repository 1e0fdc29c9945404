//! predict.rs — predicción de tendencia por tramo
//!
//! Regresión lineal simple (OLS) sobre las últimas 10 muestras de cada tramo,
//! proyectada en pasos de 5 minutos. Sin varianza ni pendiente se usa la
//! media. Sin histórico alguno: snapshot simulado con deriva simple.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::engine::pattern;
use crate::engine::snapshot::{congestion, density_from_congestion, derive_speed, round2, VALUE_FLOOR};
use crate::engine::state::{CityRegistry, CityState};
use crate::error::TrafficError;
use crate::models::types::{
    City, Feature, ForecastPoint, PersistedRecord, PredictionMeta, PredictionMode,
    PredictionResponse, SegmentSeries, Snapshot,
};
use crate::store::{PersistedStore, RecordQuery};

pub const STEP_MINUTES: u32 = 5;
pub const MAX_SAMPLES: usize = 10;
pub const STORE_SCAN_LIMIT: usize = 1000;
pub const MIN_HORIZON: u32 = 1;
pub const MAX_HORIZON: u32 = 120;
pub const DEFAULT_HORIZON: u32 = 30;

const EPS: f64 = 1e-9;
const DRIFT_PER_STEP: f64 = 0.02;

/// `None` o vacío → 30; fuera de [1,120] o no numérico → error de validación.
pub fn parse_horizon(raw: Option<&str>) -> Result<u32, TrafficError> {
    let Some(t) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(DEFAULT_HORIZON);
    };
    match t.parse::<i64>() {
        Ok(h) if (MIN_HORIZON as i64..=MAX_HORIZON as i64).contains(&h) => Ok(h as u32),
        _ => Err(TrafficError::InvalidHorizon(t.to_string())),
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub mean: f64,
    pub variance: f64,
}

impl LinearFit {
    /// Mínimos cuadrados de `ys` sobre `xs`. `None` si no hay puntos.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Option<Self> {
        let n = xs.len().min(ys.len());
        if n == 0 {
            return None;
        }
        let nf = n as f64;
        let mx = xs[..n].iter().sum::<f64>() / nf;
        let my = ys[..n].iter().sum::<f64>() / nf;
        let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
        for (x, y) in xs[..n].iter().zip(&ys[..n]) {
            sxx += (x - mx) * (x - mx);
            sxy += (x - mx) * (y - my);
            syy += (y - my) * (y - my);
        }
        let slope = if sxx < EPS { 0.0 } else { sxy / sxx };
        Some(Self { slope, intercept: my - slope * mx, mean: my, variance: syy / nf })
    }

    pub fn is_flat(&self) -> bool {
        self.variance < EPS && self.slope.abs() < EPS
    }

    pub fn at(&self, x: f64) -> f64 {
        if self.is_flat() { self.mean } else { self.intercept + self.slope * x }
    }
}

#[derive(Clone, Debug)]
struct Sample {
    at: DateTime<Utc>,
    speed: f64,
    density: f64,
}

#[derive(Clone, Debug)]
struct SeriesInput {
    id: String,
    coordinates: [[f64; 2]; 2],
    samples: Vec<Sample>,
}

#[inline]
fn minutes_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b - a).num_milliseconds() as f64 / 60_000.0
}

#[inline]
fn step_time(now: DateTime<Utc>, k: u32) -> DateTime<Utc> {
    now + Duration::minutes((k * STEP_MINUTES) as i64)
}

fn point(timestamp: DateTime<Utc>, speed: f64, density: f64) -> ForecastPoint {
    let speed = speed.max(VALUE_FLOOR);
    let density = density.max(VALUE_FLOOR);
    ForecastPoint {
        timestamp,
        speed_kph: round2(speed),
        density_vpkm: round2(density),
        congestion: congestion(speed, density),
    }
}

fn feature_from_point(id: &str, coordinates: [[f64; 2]; 2], p: &ForecastPoint) -> Feature {
    Feature {
        id: id.to_string(),
        coordinates,
        speed_kph: p.speed_kph,
        density_vpkm: p.density_vpkm,
        congestion: p.congestion,
    }
}

/// Hasta 10 muestras por tramo desde filas del store (vienen más recientes primero).
fn series_from_records(rows: &[PersistedRecord], st: &CityState) -> Vec<SeriesInput> {
    let mut buckets: BTreeMap<&str, SeriesInput> = BTreeMap::new();
    for r in rows {
        let coordinates = match st.segment(&r.segment_id) {
            Some(seg) => seg.coordinates,
            None => match r.coordinates() {
                Some(c) => c,
                None => continue,
            },
        };
        let e = buckets.entry(r.segment_id.as_str()).or_insert_with(|| SeriesInput {
            id: r.segment_id.clone(),
            coordinates,
            samples: Vec::new(),
        });
        if e.samples.len() >= MAX_SAMPLES {
            continue;
        }
        let density = st
            .snapshot_at(r.timestamp)
            .and_then(|s| s.feature(&r.segment_id))
            .map(|f| f.density_vpkm)
            .unwrap_or_else(|| density_from_congestion(r.avg_speed, r.congestion_level));
        e.samples.push(Sample { at: r.timestamp, speed: r.avg_speed, density });
    }
    buckets
        .into_values()
        .map(|mut s| {
            s.samples.reverse();
            s
        })
        .collect()
}

/// Recorre el buffer hacia atrás hasta llenar 10 muestras por tramo o agotarlo.
fn series_from_buffer(st: &CityState) -> Vec<SeriesInput> {
    let target = st.segments().len();
    let mut buckets: BTreeMap<String, SeriesInput> = BTreeMap::new();
    let mut full = 0;
    for snap in st.history().iter().rev() {
        if target > 0 && full >= target {
            break;
        }
        for f in &snap.features {
            let e = buckets.entry(f.id.clone()).or_insert_with(|| SeriesInput {
                id: f.id.clone(),
                coordinates: f.coordinates,
                samples: Vec::new(),
            });
            if e.samples.len() >= MAX_SAMPLES {
                continue;
            }
            e.samples.push(Sample { at: snap.timestamp, speed: f.speed_kph, density: f.density_vpkm });
            if e.samples.len() == MAX_SAMPLES {
                full += 1;
            }
        }
    }
    buckets
        .into_values()
        .map(|mut s| {
            s.samples.reverse();
            s
        })
        .collect()
}

fn project_series(input: &SeriesInput, now: DateTime<Utc>, steps: u32) -> Option<(Feature, SegmentSeries)> {
    let first = input.samples.first()?;
    let xs: Vec<f64> = input.samples.iter().map(|s| minutes_between(first.at, s.at)).collect();
    let speeds: Vec<f64> = input.samples.iter().map(|s| s.speed).collect();
    let densities: Vec<f64> = input.samples.iter().map(|s| s.density).collect();
    let speed_fit = LinearFit::fit(&xs, &speeds)?;
    let density_fit = LinearFit::fit(&xs, &densities)?;
    let last_x = xs.last().copied().unwrap_or(0.0);

    let points: Vec<ForecastPoint> = (1..=steps)
        .map(|k| {
            let x = last_x + (k * STEP_MINUTES) as f64;
            point(step_time(now, k), speed_fit.at(x), density_fit.at(x))
        })
        .collect();

    let head = match points.first() {
        Some(p) => feature_from_point(&input.id, input.coordinates, p),
        None => {
            let last = input.samples.last()?;
            feature_from_point(&input.id, input.coordinates, &point(last.at, last.speed, last.density))
        }
    };
    Some((head, SegmentSeries { id: input.id.clone(), coordinates: input.coordinates, points }))
}

/// Deriva simple: la densidad sube o baja un 2 % por paso según la tendencia del patrón.
fn drift_series(snapshot: &Snapshot, st: &CityState, now: DateTime<Utc>, steps: u32) -> Vec<SegmentSeries> {
    let k_now = pattern::intensity_at(now);
    snapshot
        .features
        .iter()
        .map(|f| {
            let points = (1..=steps)
                .map(|k| {
                    let t = step_time(now, k);
                    let di = pattern::intensity_at(t) - k_now;
                    let sign = if di.abs() < EPS { 0.0 } else { di.signum() };
                    let density = (f.density_vpkm * (1.0 + DRIFT_PER_STEP * k as f64 * sign)).max(VALUE_FLOOR);
                    let speed = match st.segment(&f.id) {
                        Some(seg) => derive_speed(seg.base_speed_kph, seg.base_density_vpkm, density),
                        None => f.speed_kph,
                    };
                    point(t, speed, density)
                })
                .collect();
            SegmentSeries { id: f.id.clone(), coordinates: f.coordinates, points }
        })
        .collect()
}

pub struct TrendPredictor {
    registry: Arc<CityRegistry>,
    store: Option<Arc<dyn PersistedStore>>,
}

impl TrendPredictor {
    pub fn new(registry: Arc<CityRegistry>, store: Option<Arc<dyn PersistedStore>>) -> Self {
        Self { registry, store }
    }

    async fn store_rows(&self, city: City) -> Vec<PersistedRecord> {
        let Some(store) = &self.store else { return Vec::new() };
        match store.find(&RecordQuery::latest(city, STORE_SCAN_LIMIT)).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("predict {city}: {}", TrafficError::Persistence(format!("{e:#}")));
                Vec::new()
            }
        }
    }

    pub async fn predict(&self, city: City, horizon_minutes: u32, now: DateTime<Utc>) -> PredictionResponse {
        let steps = horizon_minutes / STEP_MINUTES;
        let rows = self.store_rows(city).await;
        let shared = self.registry.get(city);

        let inputs = {
            let st = shared.read().await;
            if rows.is_empty() { series_from_buffer(&st) } else { series_from_records(&rows, &st) }
        };
        let samples: usize = inputs.iter().map(|s| s.samples.len()).sum();

        if samples == 0 {
            debug!("predict {city}: sin histórico, fallback simulado");
            let mut st = shared.write().await;
            let snap = st.simulate(now);
            let time_series = drift_series(&snap, &st, now, steps);
            let features = snap
                .features
                .iter()
                .zip(&time_series)
                .map(|(f, s)| match s.points.first() {
                    Some(p) => feature_from_point(&f.id, f.coordinates, p),
                    None => f.clone(),
                })
                .collect();
            return PredictionResponse {
                city,
                timestamp: now,
                horizon_minutes,
                step_minutes: STEP_MINUTES,
                features,
                time_series,
                meta: PredictionMeta { mode: PredictionMode::FallbackSimulated, samples: 0 },
            };
        }

        let (features, time_series): (Vec<_>, Vec<_>) =
            inputs.iter().filter_map(|s| project_series(s, now, steps)).unzip();
        debug!("predict {city}: {} tramos, {samples} muestras", time_series.len());
        PredictionResponse {
            city,
            timestamp: now,
            horizon_minutes,
            step_minutes: STEP_MINUTES,
            features,
            time_series,
            meta: PredictionMeta { mode: PredictionMode::Trend, samples },
        }
    }
}
