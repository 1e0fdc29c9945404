//! api.rs — Rutas HTTP: /health, /api/traffic/{live,history,predict,self-test}

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, services::ServeDir};

use crate::engine::{history::resolve_window, predict::parse_horizon, TrafficEngine};
use crate::error::TrafficError;
use crate::models::types::{City, HistoryPointsResponse};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<TrafficEngine>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/traffic/live", get(get_live))
        .route("/api/traffic/history", get(get_history))
        .route("/api/traffic/predict", get(get_predict))
        .route("/api/traffic/self-test", get(get_self_test))
        .fallback_service(ServeDir::new("web"))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}

/// Sin `city` se usa la ciudad por defecto; un nombre desconocido es 400.
fn city_param(raw: Option<&str>) -> Result<City, TrafficError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(c) => City::parse(c),
        None => Ok(City::DEFAULT),
    }
}

// Todo llega como texto: la validación la hacemos nosotros para responder
// con nuestros códigos en vez del rechazo genérico de axum.
#[derive(Debug, Default, Deserialize)]
pub struct LiveQuery {
    pub city: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub city: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// `points` para la forma plana
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictQuery {
    pub city: Option<String>,
    pub horizon_minutes: Option<String>,
}

async fn get_live(State(st): State<ApiState>, Query(q): Query<LiveQuery>) -> Result<Response, TrafficError> {
    let city = city_param(q.city.as_deref())?;
    let snap = st.engine.live_snapshot(city, Utc::now()).await;
    Ok(Json(snap).into_response())
}

async fn get_history(State(st): State<ApiState>, Query(q): Query<HistoryQuery>) -> Result<Response, TrafficError> {
    let city = city_param(q.city.as_deref())?;
    let (from, to) = resolve_window(q.from.as_deref(), q.to.as_deref(), Utc::now())?;
    let h = st.engine.history(city, from, to).await;
    if q.format.as_deref().is_some_and(|f| f.eq_ignore_ascii_case("points")) {
        return Ok(Json(HistoryPointsResponse::from(h)).into_response());
    }
    Ok(Json(h).into_response())
}

async fn get_predict(State(st): State<ApiState>, Query(q): Query<PredictQuery>) -> Result<Response, TrafficError> {
    let city = city_param(q.city.as_deref())?;
    let horizon = parse_horizon(q.horizon_minutes.as_deref())?;
    let p = st.engine.predict(city, horizon, Utc::now()).await;
    Ok(Json(p).into_response())
}

async fn get_self_test(State(st): State<ApiState>) -> impl IntoResponse {
    Json(st.engine.self_test(Utc::now()).await)
}
