//! Model catalogue types (`models.json`) and the model listing response.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single model entry from the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub description: String,
    /// Model family, e.g. "kimi" or "glm".
    #[serde(rename = "type", default)]
    pub model_type: String,
    /// Name of the API key variable backing this model, e.g. `MOONSHOT_API_KEY`.
    #[serde(default)]
    pub env_key: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: TemperatureConfig,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Allowed temperature range and default for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureConfig {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            default: 0.7,
        }
    }
}

/// Metadata about a model family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTypeInfo {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub language_support: Vec<String>,
}

/// A model category description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// The complete `models.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCatalogue {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub model_types: HashMap<String, ModelTypeInfo>,
    #[serde(default)]
    pub categories: HashMap<String, CategoryInfo>,
}

/// Response body of `GET /api/chat/models`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponse {
    pub models: Vec<ModelConfig>,
    pub default_model: String,
}
