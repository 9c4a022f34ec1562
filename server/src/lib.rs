//! Petri server runtime.
//!
//! Wires the deterministic engine to the transactional store: the ledger and
//! escrow engine, the lifecycle controller with its per-match owner tasks,
//! and the HTTP/WebSocket ingress surface.

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod controller;
pub mod db;
pub mod ledger;
pub mod metrics;
pub mod registry;
pub mod runner;
pub mod session;

#[cfg(test)]
mod lifecycle_tests;

pub use api::Api;
pub use controller::{Controller, ControllerConfig, MatchDirectory};
pub use db::Db;
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use registry::Registry;

use petri_types::constants::{DEFAULT_MAP_RADIUS, LOBBY_START_TIMEOUT_SECS, TICK_RATE_HZ};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// SQLite path (`DATABASE_URL`); `:memory:` for tests.
    pub db_path: String,
    /// HMAC secret binding bearer tokens to accounts (`JWT_SECRET`).
    pub jwt_secret: String,
    /// Simulation rate (`TICK_RATE` override, tests only).
    pub tick_rate: u32,
    /// World size (`MAP_RADIUS`).
    pub map_radius: f64,
    pub lobby_timeout_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let db_path = std::env::var("DATABASE_URL").unwrap_or_else(|_| "petri.db".to_string());
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET must be set");
        }
        let tick_rate = match std::env::var("TICK_RATE") {
            Ok(value) => value.parse().map_err(|_| {
                anyhow::anyhow!("invalid TICK_RATE: {value}")
            })?,
            Err(_) => TICK_RATE_HZ,
        };
        let map_radius = match std::env::var("MAP_RADIUS") {
            Ok(value) => value.parse().map_err(|_| {
                anyhow::anyhow!("invalid MAP_RADIUS: {value}")
            })?,
            Err(_) => DEFAULT_MAP_RADIUS,
        };
        Ok(Self {
            db_path,
            jwt_secret,
            tick_rate,
            map_radius,
            lobby_timeout_secs: LOBBY_START_TIMEOUT_SECS,
        })
    }
}

pub struct AppState {
    pub config: ServerConfig,
    pub db: Arc<Db>,
    pub ledger: Arc<Ledger>,
    pub registry: Arc<Registry>,
    pub controller: Arc<Controller>,
    pub directory: Arc<MatchDirectory>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ledger::LedgerError> {
        let db = Arc::new(Db::open(&config.db_path)?);
        let metrics = Arc::new(Metrics::default());
        let ledger = Arc::new(Ledger::new(Arc::clone(&db), Arc::clone(&metrics)));
        let registry = Arc::new(Registry::new(Arc::clone(&db)));
        let controller = Arc::new(Controller::new(
            Arc::clone(&db),
            Arc::clone(&ledger),
            Arc::clone(&registry),
            Arc::clone(&metrics),
            ControllerConfig {
                tick_rate: config.tick_rate,
                map_radius: config.map_radius,
                lobby_timeout_secs: config.lobby_timeout_secs,
            },
        ));
        let directory = controller.directory();
        Ok(Arc::new(Self {
            config,
            db,
            ledger,
            registry,
            controller,
            directory,
            metrics,
        }))
    }
}
