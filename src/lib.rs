//! motor_trafico — estado de tráfico por ciudad (live, histórico y predicción)
//!
//! El binario (`main.rs`) monta la configuración, el scheduler y la API;
//! aquí vive todo lo demás para poder probarlo sin levantar el proceso.

pub mod engine;
pub mod error;
pub mod models;
pub mod server;
pub mod store;
