pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod test_util;

pub use config::{Config, ModelsConfig, StreamConfig, UpstreamConfig};
pub use error::GatewayError;
pub use registry::{ModelCounts, ModelRegistry, RegistryError};
pub use relay::{Forwarder, HttpForwarder, RelayOutcome, Session, SessionContext};

use std::sync::Arc;

/// Shared application state.
///
/// Read-only once built; sessions only ever hold an `Arc` to it.
pub struct AppState {
    pub config: Config,
    /// Model catalogue and availability.
    pub registry: Arc<ModelRegistry>,
    /// Opens the upstream stream for each chat session.
    pub forwarder: Arc<dyn Forwarder>,
}

impl AppState {
    pub fn new(config: Config, registry: ModelRegistry, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            forwarder,
        }
    }
}
