//! Chat stream request and chunk types shared by the gateway and its clients.

use serde::{Deserialize, Deserializer, Serialize};

/// Inbound streaming chat request.
///
/// Field names follow the frontend's camelCase convention. The same shape is
/// forwarded verbatim to the upstream inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamRequest {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Enables the upstream's long "thinking" generation mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_mode: Option<bool>,
}

impl ChatStreamRequest {
    /// Create a request with only messages set.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            thinking_mode: None,
        }
    }

    /// Return a copy of this request targeting `model`.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    #[default]
    User,
    Ai,
}

impl Sender {
    /// Parse a sender tag, falling back to `User` for anything unrecognised.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "ai" => Sender::Ai,
            _ => Sender::User,
        }
    }
}

impl<'de> Deserialize<'de> for Sender {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Sender::parse_lenient).unwrap_or_default())
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub sender: Sender,
    #[serde(default)]
    pub time: String,
}

impl Message {
    pub fn new(id: impl Into<String>, content: impl Into<String>, sender: Sender) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            sender,
            time: String::new(),
        }
    }
}

/// Incremental unit of generated output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub finished: bool,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finished: false,
        }
    }

    pub fn finished(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finished: true,
        }
    }
}
