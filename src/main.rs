//! main.rs — Motor de tráfico: scheduler de simulación + store + API (config desde ENV)

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use motor_trafico::engine::{scheduler::spawn_scheduler, state::CityRegistry, TrafficEngine};
use motor_trafico::models::types::{AppCfg, StoreKind};
use motor_trafico::server::{self, live::TomTomClient};
use motor_trafico::store::{JsonlStore, MemoryStore, PersistedStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs: RUST_LOG manda; por defecto info
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = AppCfg::from_env();

    // Registro explícito con las tres ciudades
    let registry = CityRegistry::new(cfg.seed_offset, cfg.history_cap);

    // Store: memoria o JSONL local
    let store: Arc<dyn PersistedStore> = match cfg.store {
        StoreKind::Memory => Arc::new(MemoryStore::with_max_rows(cfg.store_max_rows)),
        StoreKind::Jsonl => {
            info!("Histórico en {}", cfg.jsonl_path);
            Arc::new(JsonlStore::with_max_rows(&cfg.jsonl_path, cfg.store_max_rows))
        }
    };
    let mut engine = TrafficEngine::new(registry).with_store(store);

    // Provider TomTom (opcional)
    if let Some(key) = cfg.tomtom_key.clone() {
        match TomTomClient::new(key, cfg.tomtom_base_url.clone(), cfg.live_timeout()) {
            Ok(client) => {
                let cities = cfg.resolved_live_cities();
                info!("Modo live para {:?}", cities);
                engine = engine.with_live(Arc::new(client), cities, cfg.live_timeout());
            }
            Err(e) => warn!("TomTom deshabilitado: {e:?}"),
        }
    }
    let engine = Arc::new(engine);

    // Lanza el scheduler de simulación
    let ticker = spawn_scheduler(engine.clone(), cfg.tick_period());

    // API
    let app = server::api::router(server::api::ApiState { engine: engine.clone() });
    info!("Escuchando en http://{}", cfg.bind);
    let listener = tokio::net::TcpListener::bind(&cfg.bind).await?;
    let serve = axum::serve(listener, app);
    tokio::select! {
        r = serve => { r?; },
        _ = signal::ctrl_c() => { info!("Señal de salida recibida"); }
    }

    ticker.abort();
    Ok(())
}
