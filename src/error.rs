//! error.rs — taxonomía de errores del motor
//!
//! Solo los errores de validación llegan al cliente (4xx con código legible).
//! `Upstream` y `Persistence` se recuperan localmente y acaban en el log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("ciudad no soportada: {0}")]
    InvalidCity(String),

    #[error("timestamp no válido: {0}")]
    InvalidTimestamp(String),

    #[error("rango no válido: from {from} es posterior a to {to}")]
    InvalidRange { from: String, to: String },

    #[error("horizonMinutes debe estar entre 1 y 120 (recibido {0})")]
    InvalidHorizon(String),

    #[error("proveedor live: {0}")]
    Upstream(String),

    #[error("persistencia: {0}")]
    Persistence(String),
}

impl TrafficError {
    pub fn code(&self) -> &'static str {
        match self {
            TrafficError::InvalidCity(_) => "invalid_city",
            TrafficError::InvalidTimestamp(_) => "invalid_timestamp",
            TrafficError::InvalidRange { .. } => "invalid_range",
            TrafficError::InvalidHorizon(_) => "invalid_horizon",
            TrafficError::Upstream(_) => "upstream_error",
            TrafficError::Persistence(_) => "persistence_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TrafficError::Upstream(_) => StatusCode::BAD_GATEWAY,
            TrafficError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for TrafficError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.code(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
