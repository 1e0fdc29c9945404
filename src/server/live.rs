//! live.rs — proveedor de datos reales (TomTom Flow Segment Data)
//!
//! El motor solo conoce el trait `LiveDataProvider`. Cualquier fallo aquí es
//! esperado: quien llama cae a la simulación para esa petición.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;

use crate::engine::snapshot::{congestion, round2, VALUE_FLOOR};
use crate::models::types::{City, Feature, Segment, Snapshot, Source};

/// Velocidad libre supuesta cuando el proveedor no la da
const DEFAULT_FREE_FLOW_KPH: f64 = 80.0;

#[async_trait]
pub trait LiveDataProvider: Send + Sync {
    async fn fetch(&self, city: City, segments: &[Segment]) -> Result<Snapshot>;
}

/// Cliente TomTom Flow Segment Data (FSD)
pub struct TomTomClient {
    pub(crate) http: Client,
    pub api_key: String,
    /// Endpoint base, p.ej: "https://api.tomtom.com/traffic/services/4/flowSegmentData/absolute/10/json"
    pub base_url_absolute: String,
    /// Tramos consultados por snapshot (una llamada por tramo)
    pub max_probes: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowResponse {
    flow_segment_data: FlowSegmentData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSegmentData {
    pub current_speed: f64,
    #[serde(default)]
    pub free_flow_speed: Option<f64>,
}

impl TomTomClient {
    pub fn new(api_key: String, base_url_absolute: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .brotli(true)
            .gzip(true)
            .deflate(true)
            .timeout(timeout)
            .build()?;
        Ok(Self { http, api_key, base_url_absolute, max_probes: 16 })
    }

    async fn flow_at(&self, lat: f64, lon: f64) -> Result<FlowSegmentData> {
        let point = format!("{lat:.6},{lon:.6}");
        let resp = self
            .http
            .get(&self.base_url_absolute)
            .query(&[("key", self.api_key.as_str()), ("point", point.as_str()), ("unit", "KMPH")])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("TomTom HTTP {status}");
        }
        Ok(resp.json::<FlowResponse>().await?.flow_segment_data)
    }
}

/// Índices repartidos uniformemente sobre `n` tramos, como mucho `max`.
pub fn probe_indices(n: usize, max: usize) -> Vec<usize> {
    if n == 0 || max == 0 {
        return Vec::new();
    }
    let k = n.min(max);
    (0..k).map(|i| i * n / k).collect()
}

/// El proveedor no da densidad: se aproxima a partir de la velocidad.
pub fn density_from_speed(speed: f64, free_flow: Option<f64>) -> f64 {
    let ff = free_flow.filter(|v| *v > 0.0).unwrap_or(DEFAULT_FREE_FLOW_KPH);
    round2((80.0 * (1.0 - speed / ff)).max(VALUE_FLOOR))
}

pub fn feature_from_flow(segment: &Segment, flow: &FlowSegmentData) -> Feature {
    let speed = flow.current_speed.max(0.0);
    let density = density_from_speed(speed, flow.free_flow_speed);
    Feature {
        id: segment.id.clone(),
        coordinates: segment.coordinates,
        speed_kph: round2(speed),
        density_vpkm: density,
        congestion: congestion(speed, density),
    }
}

#[async_trait]
impl LiveDataProvider for TomTomClient {
    async fn fetch(&self, city: City, segments: &[Segment]) -> Result<Snapshot> {
        let probes: Vec<&Segment> = probe_indices(segments.len(), self.max_probes)
            .into_iter()
            .map(|i| &segments[i])
            .collect();
        let calls = probes.iter().map(|s| {
            let [[lng0, lat0], [lng1, lat1]] = s.coordinates;
            self.flow_at((lat0 + lat1) / 2.0, (lng0 + lng1) / 2.0)
        });
        let results = join_all(calls).await;

        let mut features = Vec::with_capacity(probes.len());
        let mut last_err = None;
        for (seg, r) in probes.iter().zip(results) {
            match r {
                Ok(flow) => features.push(feature_from_flow(seg, &flow)),
                Err(e) => last_err = Some(e),
            }
        }
        if features.is_empty() {
            return Err(last_err.unwrap_or_else(|| anyhow!("sin tramos que consultar en {city}")));
        }
        Ok(Snapshot {
            city,
            timestamp: Utc::now(),
            features,
            incidents: Vec::new(),
            source: Source::External,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::segments::generate_segments;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn probes_are_spread() {
        assert_eq!(probe_indices(120, 4), vec![0, 30, 60, 90]);
        assert_eq!(probe_indices(3, 10), vec![0, 1, 2]);
        assert!(probe_indices(0, 10).is_empty());
    }

    #[test]
    fn density_inverse_formula() {
        assert_eq!(density_from_speed(40.0, Some(50.0)), 16.0);
        assert_eq!(density_from_speed(40.0, None), 40.0);
        assert_eq!(density_from_speed(90.0, Some(50.0)), VALUE_FLOOR);
    }

    #[test]
    fn parses_flow_payload() {
        let raw = r#"{"flowSegmentData":{"frc":"FRC2","currentSpeed":27,"freeFlowSpeed":45,"confidence":0.9}}"#;
        let r: FlowResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(r.flow_segment_data.current_speed, 27.0);
        assert_eq!(r.flow_segment_data.free_flow_speed, Some(45.0));
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/flow")
    }

    #[tokio::test]
    async fn fetch_against_local_server() {
        let app = Router::new().route(
            "/flow",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("key").map(String::as_str), Some("k"));
                Json(json!({ "flowSegmentData": { "currentSpeed": 30.0, "freeFlowSpeed": 60.0 } }))
            }),
        );
        let url = serve(app).await;
        let mut client = TomTomClient::new("k".into(), url, Duration::from_secs(2)).unwrap();
        client.max_probes = 5;
        let segs = generate_segments(City::Mumbai, 2024);
        let snap = client.fetch(City::Mumbai, &segs).await.unwrap();
        assert_eq!(snap.source, Source::External);
        assert_eq!(snap.features.len(), 5);
        assert!(snap.features.iter().all(|f| f.speed_kph == 30.0 && f.density_vpkm == 40.0));
    }

    #[tokio::test]
    async fn http_errors_surface() {
        let app = Router::new().route(
            "/flow",
            get(|| async { (axum::http::StatusCode::FORBIDDEN, "bad key") }),
        );
        let url = serve(app).await;
        let client = TomTomClient::new("k".into(), url, Duration::from_secs(2)).unwrap();
        let segs = generate_segments(City::Delhi, 4242);
        assert!(client.fetch(City::Delhi, &segs).await.is_err());
    }
}
