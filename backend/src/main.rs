use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use chat_relay_gateway::config::CorsConfig;
use chat_relay_gateway::logging::{init_tracing, request_logger};
use chat_relay_gateway::{routes, AppState, Config, HttpForwarder, ModelRegistry};

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins = cors.origins.trim();
    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let list: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(list)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    init_tracing(&config.logging.level);

    tracing::info!("Starting chat relay gateway");

    // Model catalogue; without one, requested models are passed through unchecked
    let catalogue = match ModelRegistry::load_catalogue(&config.models.path).await {
        Ok(catalogue) => {
            tracing::info!(
                path = %config.models.path,
                models = catalogue.models.len(),
                "Loaded model catalogue"
            );
            catalogue
        }
        Err(e) if e.is_not_found() => {
            tracing::warn!(path = %config.models.path, "Model catalogue not found, running without one");
            Default::default()
        }
        Err(e) => return Err(e.into()),
    };
    let registry = ModelRegistry::new(catalogue, &config);

    let forwarder = HttpForwarder::new(&config.upstream, &config.stream)?;
    tracing::info!(
        upstream = %forwarder.url(),
        total_timeout_secs = config.stream.total_timeout_secs,
        heartbeat_interval_secs = config.stream.heartbeat_interval_secs,
        read_timeout_secs = config.stream.read_timeout_secs,
        "Upstream forwarder ready"
    );

    let state = Arc::new(AppState::new(config.clone(), registry, Arc::new(forwarder)));

    // Build router
    let app = routes::router(state)
        .layer(middleware::from_fn(request_logger))
        .layer(cors_layer(&config.cors))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
