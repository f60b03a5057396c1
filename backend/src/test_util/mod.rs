//! Fakes for driving the gateway without a real inference service.

pub mod mock_upstream;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use futures_util::{stream, Stream};
use relay_common::{ChatStreamRequest, ModelCatalogue, ModelConfig, TemperatureConfig};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::registry::ModelRegistry;
use crate::relay::{Forwarder, ReadPolicy, SessionContext, UpstreamStream};
use crate::{routes, AppState};

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.logging.level = "debug".to_string();
    config
        .api_keys
        .insert("moonshot".to_string(), "sk-test".to_string());
    config
}

fn test_model(id: &str, model_type: &str, env_key: &str, enabled: bool) -> ModelConfig {
    ModelConfig {
        id: id.to_string(),
        name: id.to_string(),
        provider: model_type.to_string(),
        description: String::new(),
        model_type: model_type.to_string(),
        env_key: env_key.to_string(),
        enabled,
        max_tokens: 8192,
        temperature: TemperatureConfig::default(),
        features: vec!["streaming".to_string()],
    }
}

/// Kimi (available with [`test_config`]), GLM (no key) and a disabled model.
pub fn test_catalogue() -> ModelCatalogue {
    ModelCatalogue {
        models: vec![
            test_model("kimi-k2-turbo-preview", "kimi", "MOONSHOT_API_KEY", true),
            test_model("glm-4-flash", "glm", "GLM_API_KEY", true),
            test_model("moonshot-v1-8k", "moonshot", "MOONSHOT_API_KEY", false),
        ],
        default_model: "kimi-k2-turbo-preview".to_string(),
        ..Default::default()
    }
}

pub fn create_test_state(config: Config, forwarder: Arc<dyn Forwarder>) -> Arc<AppState> {
    let registry = ModelRegistry::new(test_catalogue(), &config);
    Arc::new(AppState::new(config, registry, forwarder))
}

/// Router over a test state.
pub fn test_app(config: Config, forwarder: Arc<dyn Forwarder>) -> Router {
    routes::router(create_test_state(config, forwarder))
}

/// One step of a scripted upstream body.
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver a block.
    Send(Bytes),
    /// Stay silent for a while.
    Wait(Duration),
    /// Break the connection.
    Fail(String),
    /// Never deliver anything again.
    Hang,
}

impl Step {
    pub fn line(text: &str) -> Self {
        Step::Send(Bytes::from(format!("{}\n", text)))
    }
}

/// Sets the flag when dropped, marking the upstream body as released.
struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Body that plays `steps` in order, then ends.
pub fn scripted_stream(
    steps: Vec<Step>,
    released: Arc<AtomicBool>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let state = (steps.into_iter(), ReleaseGuard(released));
    stream::unfold(state, |(mut steps, guard)| async move {
        loop {
            match steps.next()? {
                Step::Send(block) => return Some((Ok(block), (steps, guard))),
                Step::Wait(duration) => tokio::time::sleep(duration).await,
                Step::Fail(message) => {
                    return Some((Err(io::Error::other(message)), (steps, guard)))
                }
                Step::Hang => std::future::pending::<()>().await,
            }
        }
    })
}

/// Forwarder that replays the same script for every session.
pub struct ScriptedForwarder {
    steps: Vec<Step>,
    policy: ReadPolicy,
    released: Arc<AtomicBool>,
    last_request: Mutex<Option<ChatStreamRequest>>,
}

impl ScriptedForwarder {
    pub fn new(steps: Vec<Step>) -> Self {
        Self::with_policy(steps, ReadPolicy::Unbounded)
    }

    pub fn with_policy(steps: Vec<Step>, policy: ReadPolicy) -> Self {
        Self {
            steps,
            policy,
            released: Arc::new(AtomicBool::new(false)),
            last_request: Mutex::new(None),
        }
    }

    /// Whether the most recent upstream body has been dropped.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// The request as it was sent upstream.
    pub async fn last_request(&self) -> Option<ChatStreamRequest> {
        self.last_request.lock().await.clone()
    }
}

#[async_trait]
impl Forwarder for ScriptedForwarder {
    async fn open(
        &self,
        request: &ChatStreamRequest,
        _session: &SessionContext,
    ) -> Result<UpstreamStream> {
        *self.last_request.lock().await = Some(request.clone());
        self.released.store(false, Ordering::SeqCst);
        let body = scripted_stream(self.steps.clone(), self.released.clone());
        Ok(UpstreamStream::new(body, self.policy))
    }
}

/// Forwarder whose every call fails before a stream is opened.
pub struct FailingForwarder {
    make_error: Box<dyn Fn() -> GatewayError + Send + Sync>,
    calls: AtomicUsize,
}

impl FailingForwarder {
    pub fn new<F>(make_error: F) -> Self
    where
        F: Fn() -> GatewayError + Send + Sync + 'static,
    {
        Self {
            make_error: Box::new(make_error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Forwarder for FailingForwarder {
    async fn open(
        &self,
        _request: &ChatStreamRequest,
        _session: &SessionContext,
    ) -> Result<UpstreamStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err((self.make_error)())
    }
}
