//! Request decoding and model resolution, both before any upstream call.

use relay_common::ChatStreamRequest;

use crate::error::{GatewayError, Result};
use crate::registry::ModelRegistry;

/// Decode a raw request body.
pub fn decode_request(body: &[u8]) -> Result<ChatStreamRequest> {
    let request: ChatStreamRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::MalformedRequest(e.to_string()))?;

    if request.messages.is_empty() {
        return Err(GatewayError::MalformedRequest(
            "messages must not be empty".to_string(),
        ));
    }

    Ok(request)
}

/// Fill in the default model and reject models that cannot be served.
///
/// With an empty registry every explicit model is passed through.
pub fn resolve_model(
    registry: &ModelRegistry,
    request: ChatStreamRequest,
) -> Result<ChatStreamRequest> {
    let requested = request
        .model
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    match requested {
        None => {
            let model = registry.default_model();
            tracing::debug!(model = %model, "No model requested, using default");
            Ok(request.with_model(model))
        }
        Some(model) => {
            if registry.is_empty() || registry.is_available(&model) {
                Ok(request.with_model(model))
            } else {
                Err(GatewayError::ModelUnavailable(model))
            }
        }
    }
}
