//! types.rs
//! Modelos de datos compartidos por el servicio: ciudades, segmentos,
//! snapshots, registros persistidos, respuestas de la API y configuración

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, DeserializeAs, SerializeAs};

use crate::error::TrafficError;

// --------------------------------------
// Ciudades soportadas
// --------------------------------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum City {
    Bangalore,
    Mumbai,
    Delhi,
}

impl City {
    pub const ALL: [City; 3] = [City::Bangalore, City::Mumbai, City::Delhi];
    pub const DEFAULT: City = City::Bangalore;

    pub fn as_str(&self) -> &'static str {
        match self {
            City::Bangalore => "Bangalore",
            City::Mumbai => "Mumbai",
            City::Delhi => "Delhi",
        }
    }

    /// Versión estricta: nombres desconocidos son error de validación.
    pub fn parse(raw: &str) -> Result<City, TrafficError> {
        let t = raw.trim();
        City::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(t))
            .ok_or_else(|| TrafficError::InvalidCity(raw.to_string()))
    }

    /// Cualquier entrada fuera de las tres canónicas cae en `DEFAULT`.
    pub fn normalize(raw: &str) -> City {
        City::parse(raw).unwrap_or(City::DEFAULT)
    }

    /// Caja envolvente (lng, lat): esquina min y esquina max
    pub fn bbox(&self) -> ([f64; 2], [f64; 2]) {
        match self {
            City::Bangalore => ([77.45, 12.85], [77.75, 13.10]),
            City::Mumbai => ([72.78, 18.89], [72.98, 19.27]),
            City::Delhi => ([76.95, 28.45], [77.35, 28.80]),
        }
    }

    /// Semilla base por ciudad para la red sintética
    pub fn seed(&self) -> u32 {
        match self {
            City::Bangalore => 1337,
            City::Mumbai => 2024,
            City::Delhi => 4242,
        }
    }
}

impl fmt::Display for City {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --------------------------------------
// Red y lecturas
// --------------------------------------

/// Tramo sintético de la red: id estable y geometría de dos puntos [lng, lat]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub coordinates: [[f64; 2]; 2],
    pub base_speed_kph: f64,
    pub base_density_vpkm: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: String,
    pub coordinates: [[f64; 2]; 2],
    pub speed_kph: f64,
    pub density_vpkm: f64,
    pub congestion: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Simulated,
    External,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub city: City,
    pub timestamp: DateTime<Utc>,
    pub features: Vec<Feature>,
    /// Reservado, siempre vacío
    pub incidents: Vec<serde_json::Value>,
    pub source: Source,
}

impl Snapshot {
    pub fn feature(&self, id: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }
}

/// Ciudad como texto libre en el store: se escribe el nombre canónico y al
/// leer se normaliza (un valor desconocido cae en la ciudad por defecto).
pub struct CityText;

impl SerializeAs<City> for CityText {
    fn serialize_as<S: Serializer>(source: &City, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(source.as_str())
    }
}

impl<'de> DeserializeAs<'de, City> for CityText {
    fn deserialize_as<D: Deserializer<'de>>(deserializer: D) -> Result<City, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(City::normalize(&raw))
    }
}

/// Fila histórica por tramo y snapshot (para el store)
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub segment_id: String,
    pub line_string: geojson::Geometry,
    pub avg_speed: f64,
    pub congestion_level: f64,
    pub timestamp: DateTime<Utc>,
    #[serde_as(as = "CityText")]
    pub city: City,
}

impl PersistedRecord {
    pub fn from_feature(city: City, timestamp: DateTime<Utc>, f: &Feature) -> Self {
        let line = f.coordinates.iter().map(|p| p.to_vec()).collect();
        Self {
            segment_id: f.id.clone(),
            line_string: geojson::Geometry::new(geojson::Value::LineString(line)),
            avg_speed: f.speed_kph,
            congestion_level: f.congestion.clamp(0.0, 1.0),
            timestamp,
            city,
        }
    }

    /// Extremos del LineString; `None` si la geometría no tiene dos puntos.
    pub fn coordinates(&self) -> Option<[[f64; 2]; 2]> {
        match &self.line_string.value {
            geojson::Value::LineString(pts) if pts.len() >= 2 => {
                let a = &pts[0];
                let b = &pts[pts.len() - 1];
                if a.len() < 2 || b.len() < 2 {
                    return None;
                }
                Some([[a[0], a[1]], [b[0], b[1]]])
            }
            _ => None,
        }
    }
}

// --------------------------------------
// Respuestas: histórico
// --------------------------------------
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentHistory {
    pub id: String,
    pub coordinates: [[f64; 2]; 2],
    pub avg_speed_kph: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_density_vpkm: Option<f64>,
    pub avg_congestion: f64,
    pub samples: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub city: City,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub count: usize,
    pub segments: Vec<SegmentHistory>,
}

/// Variante `format=points`
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub id: String,
    pub coordinates: [[f64; 2]; 2],
    pub speed_kph: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density_vpkm: Option<f64>,
    pub congestion: f64,
    pub samples: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPointsResponse {
    pub city: City,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub count: usize,
    pub segments: Vec<HistoryPoint>,
}

impl From<HistoryResponse> for HistoryPointsResponse {
    fn from(h: HistoryResponse) -> Self {
        let segments = h
            .segments
            .into_iter()
            .map(|s| HistoryPoint {
                id: s.id,
                coordinates: s.coordinates,
                speed_kph: s.avg_speed_kph,
                density_vpkm: s.avg_density_vpkm,
                congestion: s.avg_congestion,
                samples: s.samples,
            })
            .collect();
        Self { city: h.city, from: h.from, to: h.to, count: h.count, segments }
    }
}

// --------------------------------------
// Respuestas: predicción
// --------------------------------------
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub speed_kph: f64,
    pub density_vpkm: f64,
    pub congestion: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSeries {
    pub id: String,
    pub coordinates: [[f64; 2]; 2],
    pub points: Vec<ForecastPoint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PredictionMode {
    #[serde(rename = "trend")]
    Trend,
    #[serde(rename = "fallback-simulated")]
    FallbackSimulated,
}

#[derive(Clone, Debug, Serialize)]
pub struct PredictionMeta {
    pub mode: PredictionMode,
    /// Muestras históricas usadas en total (0 en fallback)
    pub samples: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub city: City,
    pub timestamp: DateTime<Utc>,
    pub horizon_minutes: u32,
    pub step_minutes: u32,
    pub features: Vec<Feature>,
    pub time_series: Vec<SegmentSeries>,
    pub meta: PredictionMeta,
}

// --------------------------------------
// Self-test del scheduler
// --------------------------------------
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CityTick {
    pub last_tick_timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfTestReport {
    pub server_timestamp: DateTime<Utc>,
    pub mode: String,
    pub tick_count: u64,
    pub cities: std::collections::BTreeMap<String, CityTick>,
}

// --------------------------------------
// Configuración
// --------------------------------------
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Jsonl,
}

#[derive(Clone, Debug)]
pub struct AppCfg {
    /// Dirección/puerto del servidor HTTP (Axum)
    pub bind: String,

    /// Periodo del scheduler (segundos)
    pub tick_s: u64,

    /// Desplazamiento sumado a la semilla de cada ciudad
    pub seed_offset: u32,

    /// Capacidad del buffer histórico por ciudad
    pub history_cap: usize,

    /// Persistencia: memoria o fichero JSONL
    pub store: StoreKind,
    pub jsonl_path: String,

    /// Retención del store: filas máximas antes de descartar las más antiguas
    pub store_max_rows: usize,

    /// Clave API TomTom (opcional). Si está ausente, todo es simulado.
    pub tomtom_key: Option<String>,
    pub tomtom_base_url: String,

    /// Timeout estricto por llamada al proveedor live
    pub live_timeout_ms: u64,

    /// Ciudades servidas desde el proveedor live (vacío = todas si hay clave)
    pub live_cities: Vec<City>,
}

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            tick_s: 10,
            seed_offset: 0,
            history_cap: 500,
            store: StoreKind::Memory,
            jsonl_path: "data/traffic_history.jsonl".into(),
            store_max_rows: crate::store::memory::DEFAULT_MAX_ROWS,
            tomtom_key: None,
            tomtom_base_url:
                "https://api.tomtom.com/traffic/services/4/flowSegmentData/absolute/10/json".into(),
            live_timeout_ms: 2500,
            live_cities: Vec::new(),
        }
    }
}

impl AppCfg {
    /// Sobrescribe los valores por defecto con lo que devuelva `get` (normalmente el entorno).
    /// Números que no parsean conservan el valor por defecto.
    pub fn apply<F>(mut self, get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("BIND") { self.bind = v; }
        if let Some(v) = get("TICK_SECONDS") { self.tick_s = v.parse().unwrap_or(self.tick_s); }
        if let Some(v) = get("SEED") { self.seed_offset = v.parse().unwrap_or(self.seed_offset); }
        if let Some(v) = get("HISTORY_CAP") { self.history_cap = v.parse().unwrap_or(self.history_cap); }
        if let Some(v) = get("STORE") {
            self.store = if v.eq_ignore_ascii_case("jsonl") { StoreKind::Jsonl } else { StoreKind::Memory };
        }
        if let Some(v) = get("JSONL_PATH") { self.jsonl_path = v; }
        if let Some(v) = get("STORE_MAX_ROWS") { self.store_max_rows = v.parse().unwrap_or(self.store_max_rows); }
        if let Some(v) = get("TOMTOM_KEY") {
            if !v.trim().is_empty() { self.tomtom_key = Some(v); }
        }
        if let Some(v) = get("TOMTOM_BASE_URL") { self.tomtom_base_url = v; }
        if let Some(v) = get("LIVE_TIMEOUT_MS") { self.live_timeout_ms = v.parse().unwrap_or(self.live_timeout_ms); }
        if let Some(v) = get("LIVE_CITIES") {
            self.live_cities = v.split(',').filter_map(|c| City::parse(c).ok()).collect();
        }
        self.tick_s = self.tick_s.max(1);
        self.history_cap = self.history_cap.max(1);
        self.store_max_rows = self.store_max_rows.max(1);
        self
    }

    pub fn from_env() -> Self {
        Self::default().apply(|k| std::env::var(k).ok())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.tick_s)
    }

    pub fn live_timeout(&self) -> Duration {
        Duration::from_millis(self.live_timeout_ms)
    }

    /// Ciudades que se sirven desde el proveedor externo
    pub fn resolved_live_cities(&self) -> Vec<City> {
        match (&self.tomtom_key, self.live_cities.is_empty()) {
            (None, _) => Vec::new(),
            (Some(_), true) => City::ALL.to_vec(),
            (Some(_), false) => self.live_cities.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn city_parse_is_case_insensitive_and_strict() {
        assert_eq!(City::parse("delhi").unwrap(), City::Delhi);
        assert_eq!(City::parse(" MUMBAI ").unwrap(), City::Mumbai);
        assert!(matches!(City::parse("Paris"), Err(TrafficError::InvalidCity(_))));
    }

    #[test]
    fn city_normalize_falls_back_to_default() {
        assert_eq!(City::normalize("Paris"), City::Bangalore);
        assert_eq!(City::normalize(""), City::Bangalore);
        assert_eq!(City::normalize("Delhi"), City::Delhi);
    }

    #[test]
    fn cfg_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TICK_SECONDS", "3"),
            ("HISTORY_CAP", "nope"),
            ("STORE", "JSONL"),
            ("TOMTOM_KEY", "abc"),
            ("LIVE_CITIES", "Delhi,Paris"),
            ("STORE_MAX_ROWS", "72000"),
        ]
        .into_iter()
        .collect();
        let c = AppCfg::default().apply(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.tick_s, 3);
        assert_eq!(c.history_cap, 500);
        assert_eq!(c.store, StoreKind::Jsonl);
        assert_eq!(c.store_max_rows, 72_000);
        assert_eq!(c.resolved_live_cities(), vec![City::Delhi]);
    }

    #[test]
    fn no_key_means_no_live_cities() {
        let c = AppCfg { live_cities: vec![City::Mumbai], ..AppCfg::default() };
        assert!(c.resolved_live_cities().is_empty());
    }

    #[test]
    fn persisted_record_keeps_line_string() {
        let f = Feature {
            id: "delhi-001".into(),
            coordinates: [[77.0, 28.5], [77.01, 28.51]],
            speed_kph: 31.5,
            density_vpkm: 22.0,
            congestion: 1.4,
        };
        let r = PersistedRecord::from_feature(City::Delhi, Utc::now(), &f);
        assert_eq!(r.coordinates(), Some(f.coordinates));
        assert_eq!(r.congestion_level, 1.0);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["city"], "Delhi");
        assert_eq!(json["lineString"]["type"], "LineString");
    }

    #[test]
    fn stored_city_text_is_normalized() {
        let f = Feature {
            id: "mumbai-003".into(),
            coordinates: [[72.8, 19.0], [72.81, 19.01]],
            speed_kph: 40.0,
            density_vpkm: 20.0,
            congestion: 0.4,
        };
        let mut json = serde_json::to_value(PersistedRecord::from_feature(City::Mumbai, Utc::now(), &f)).unwrap();
        json["city"] = "  mumbai".into();
        let r: PersistedRecord = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(r.city, City::Mumbai);
        json["city"] = "Paris".into();
        let r: PersistedRecord = serde_json::from_value(json).unwrap();
        assert_eq!(r.city, City::DEFAULT);
    }
}
