//! Model registry backed by the `models.json` catalogue.

use std::collections::HashMap;
use std::path::Path;

use relay_common::{ModelCatalogue, ModelConfig, ModelsResponse};
use serde::Serialize;
use thiserror::Error;

use crate::config::{api_key_name, Config};

/// Used when neither the configuration nor the catalogue names a usable default.
pub const FALLBACK_DEFAULT_MODEL: &str = "kimi-k2-turbo-preview";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read model catalogue {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse model catalogue {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Total and available model counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelCounts {
    pub total: usize,
    pub enabled: usize,
}

#[derive(Debug, Default)]
struct Indexed {
    catalogue: ModelCatalogue,
    /// Lowercase model id -> position in `catalogue.models`.
    by_id: HashMap<String, usize>,
    /// Lowercase model type -> position of the last model of that type.
    by_type: HashMap<String, usize>,
}

impl Indexed {
    fn build(catalogue: ModelCatalogue) -> Self {
        let mut by_id = HashMap::new();
        let mut by_type = HashMap::new();
        for (i, model) in catalogue.models.iter().enumerate() {
            by_id.insert(model.id.to_lowercase(), i);
            if !model.model_type.is_empty() {
                by_type.insert(model.model_type.to_lowercase(), i);
            }
        }
        Self {
            catalogue,
            by_id,
            by_type,
        }
    }

    fn by_id(&self, id: &str) -> Option<&ModelConfig> {
        self.by_id
            .get(&id.to_lowercase())
            .map(|&i| &self.catalogue.models[i])
    }

    fn by_type(&self, model_type: &str) -> Option<&ModelConfig> {
        self.by_type
            .get(&model_type.to_lowercase())
            .map(|&i| &self.catalogue.models[i])
    }
}

/// Lookup table of configured models, fixed once loaded.
///
/// A model is available when its `enabled` flag is set and an API key is
/// configured for its `envKey`.
pub struct ModelRegistry {
    models: Indexed,
    api_keys: HashMap<String, String>,
    configured_default: Option<String>,
}

impl ModelRegistry {
    pub fn new(catalogue: ModelCatalogue, config: &Config) -> Self {
        Self {
            models: Indexed::build(catalogue),
            api_keys: config.api_keys.clone(),
            configured_default: config
                .models
                .default_model
                .clone()
                .filter(|m| !m.trim().is_empty()),
        }
    }

    /// Read and parse a `models.json` file.
    pub async fn load_catalogue(path: impl AsRef<Path>) -> Result<ModelCatalogue, RegistryError> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await.map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| RegistryError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn has_api_key(&self, env_key: &str) -> bool {
        if env_key.trim().is_empty() {
            return false;
        }
        let name = api_key_name(env_key).unwrap_or_else(|| env_key.to_lowercase());
        self.api_keys
            .get(&name)
            .is_some_and(|key| !key.trim().is_empty())
    }

    fn model_available(&self, model: &ModelConfig) -> bool {
        model.enabled && self.has_api_key(&model.env_key)
    }

    /// Whether `model` (an id, or failing that a type) can be served.
    pub fn is_available(&self, model: &str) -> bool {
        self.models
            .by_id(model)
            .or_else(|| self.models.by_type(model))
            .is_some_and(|m| self.model_available(m))
    }

    /// All available models, in catalogue order.
    pub fn enabled_models(&self) -> Vec<ModelConfig> {
        self.models
            .catalogue
            .models
            .iter()
            .filter(|m| self.model_available(m))
            .cloned()
            .collect()
    }

    /// Pick the default model id.
    ///
    /// Order: configured default, catalogue default, first available model,
    /// then [`FALLBACK_DEFAULT_MODEL`]. Configured ids that are not in the
    /// catalogue are skipped.
    pub fn default_model(&self) -> String {
        let models = &self.models;

        if let Some(ref configured) = self.configured_default {
            if let Some(model) = models.by_id(configured) {
                return model.id.clone();
            }
            tracing::warn!(
                model = %configured,
                "Configured default model not in catalogue, falling back"
            );
        }

        let catalogue_default = &models.catalogue.default_model;
        if !catalogue_default.is_empty() {
            if let Some(model) = models.by_id(catalogue_default) {
                return model.id.clone();
            }
            tracing::warn!(
                model = %catalogue_default,
                "Catalogue default model not found, falling back"
            );
        }

        models
            .catalogue
            .models
            .iter()
            .find(|m| self.model_available(m))
            .map(|m| m.id.clone())
            .unwrap_or_else(|| FALLBACK_DEFAULT_MODEL.to_string())
    }

    /// Response body for the model listing endpoint.
    pub fn models_response(&self) -> ModelsResponse {
        ModelsResponse {
            models: self.enabled_models(),
            default_model: self.default_model(),
        }
    }

    /// Distinct types of available models, in catalogue order.
    pub fn available_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for model in self.enabled_models() {
            if !types.contains(&model.model_type) {
                types.push(model.model_type);
            }
        }
        types
    }

    /// No catalogue loaded; requests are passed through unchecked.
    pub fn is_empty(&self) -> bool {
        self.models.catalogue.models.is_empty()
    }

    pub fn counts(&self) -> ModelCounts {
        ModelCounts {
            total: self.models.catalogue.models.len(),
            enabled: self
                .models
                .catalogue
                .models
                .iter()
                .filter(|m| self.model_available(m))
                .count(),
        }
    }
}
