//! Upstream response bodies in the inference service's wire format.

use bytes::Bytes;
use relay_common::StreamChunk;

/// One JSON chunk per line, as the inference service streams them.
pub fn ndjson(chunks: &[StreamChunk]) -> Bytes {
    let mut body = String::new();
    for chunk in chunks {
        if let Ok(line) = serde_json::to_string(chunk) {
            body.push_str(&line);
            body.push('\n');
        }
    }
    Bytes::from(body)
}

/// `Hel`, `lo`, then an empty finishing chunk.
pub fn hello_chunks() -> Vec<StreamChunk> {
    vec![
        StreamChunk::text("Hel"),
        StreamChunk::text("lo"),
        StreamChunk::finished(""),
    ]
}

/// The client-facing body expected for `chunks` followed by `[DONE]`.
pub fn expected_events(chunks: &[StreamChunk]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        if let Ok(line) = serde_json::to_string(chunk) {
            body.push_str(&format!("data: {}\n\n", line));
        }
    }
    body.push_str("data: [DONE]\n\n");
    body
}
