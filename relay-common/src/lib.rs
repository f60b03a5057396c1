//! Chat Relay Common Types
//!
//! Shared types used by the streaming gateway and anything that talks to it.

pub mod chat;
pub mod models;

pub use chat::{ChatStreamRequest, Message, Sender, StreamChunk};
pub use models::{
    CategoryInfo, ModelCatalogue, ModelConfig, ModelTypeInfo, ModelsResponse, TemperatureConfig,
};
