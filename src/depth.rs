//! Client for the monocular depth estimation service.
//!
//! The service accepts an encoded image and answers in one of three shapes:
//! raw image bytes, JSON pointing at a result URL, or JSON carrying the
//! image inline as base64 (optionally as a `data:` URL). [`extract_payload`]
//! normalizes the JSON shapes and is pure so the decoding rules are
//! testable without a server.

use base64::Engine;
use serde_json::Value;

use crate::error::DepthError;

/// Default endpoint; overridable for self-hosted deployments.
pub const DEFAULT_ENDPOINT: &str = "https://api.depth-service.dev/v1/estimate";

/// Where to fetch the depth image from, decoded from a JSON response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepthPayload {
    /// Follow-up GET against this URL.
    Url(String),
    /// Image bytes decoded from inline base64.
    Inline(Vec<u8>),
}

pub struct DepthClient {
    agent: ureq::Agent,
    endpoint: String,
    token: Option<String>,
}

impl DepthClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(std::time::Duration::from_secs(60))
                .build(),
            endpoint: endpoint.into(),
            token,
        }
    }

    /// Submit an encoded image and return the encoded depth-map bytes.
    ///
    /// Every failure collapses to [`DepthError::EstimationFailed`]; the
    /// caller keeps its current scene either way.
    pub fn estimate(&self, image_bytes: &[u8]) -> Result<Vec<u8>, DepthError> {
        let mut request = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/octet-stream");
        if let Some(ref token) = self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }

        let response = request
            .send_bytes(image_bytes)
            .map_err(|e| DepthError::EstimationFailed(e.to_string()))?;

        let content_type = response.content_type().to_string();
        if content_type.starts_with("image/") {
            return read_body(response);
        }

        let json: Value = response
            .into_json()
            .map_err(|e| DepthError::EstimationFailed(format!("invalid JSON response: {e}")))?;

        match extract_payload(&json)? {
            DepthPayload::Inline(bytes) => Ok(bytes),
            DepthPayload::Url(url) => {
                let response = self
                    .agent
                    .get(&url)
                    .call()
                    .map_err(|e| DepthError::EstimationFailed(e.to_string()))?;
                read_body(response)
            }
        }
    }
}

fn read_body(response: ureq::Response) -> Result<Vec<u8>, DepthError> {
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut response.into_reader(), &mut bytes)
        .map_err(|e| DepthError::EstimationFailed(e.to_string()))?;
    Ok(bytes)
}

/// Decode a JSON response body into a fetchable payload.
///
/// Accepted shapes, in precedence order: `{"url": ...}` (also under
/// `"data"` or `"result"`), then inline base64 under `"data"`, `"image"`
/// or `"b64"`, with or without a `data:*;base64,` prefix.
pub fn extract_payload(json: &Value) -> Result<DepthPayload, DepthError> {
    if let Some(url) = json.get("url").and_then(Value::as_str) {
        return Ok(DepthPayload::Url(url.to_string()));
    }
    for key in ["data", "result"] {
        if let Some(url) = json
            .get(key)
            .and_then(|v| v.get("url"))
            .and_then(Value::as_str)
        {
            return Ok(DepthPayload::Url(url.to_string()));
        }
    }

    for key in ["data", "image", "b64"] {
        if let Some(text) = json.get(key).and_then(Value::as_str) {
            if text.starts_with("http://") || text.starts_with("https://") {
                return Ok(DepthPayload::Url(text.to_string()));
            }
            return decode_base64(text).map(DepthPayload::Inline);
        }
    }

    Err(DepthError::EstimationFailed(
        "response carries neither a result URL nor inline image data".into(),
    ))
}

/// Strip an optional `data:<mime>;base64,` prefix and decode.
fn decode_base64(text: &str) -> Result<Vec<u8>, DepthError> {
    let encoded = match text.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => text,
    };
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| DepthError::EstimationFailed(format!("invalid base64 payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_payloads_take_precedence() {
        let json = json!({ "url": "https://cdn.example/depth.png" });
        assert_eq!(
            extract_payload(&json).unwrap(),
            DepthPayload::Url("https://cdn.example/depth.png".into())
        );

        let json = json!({ "data": { "url": "https://cdn.example/nested.png" } });
        assert_eq!(
            extract_payload(&json).unwrap(),
            DepthPayload::Url("https://cdn.example/nested.png".into())
        );
    }

    #[test]
    fn data_url_strings_decode_inline() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"fake png bytes");
        let json = json!({ "data": format!("data:image/png;base64,{encoded}") });
        assert_eq!(
            extract_payload(&json).unwrap(),
            DepthPayload::Inline(b"fake png bytes".to_vec())
        );
    }

    #[test]
    fn bare_base64_decodes_inline() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG\r\n");
        let json = json!({ "b64": encoded });
        assert_eq!(
            extract_payload(&json).unwrap(),
            DepthPayload::Inline(b"\x89PNG\r\n".to_vec())
        );
    }

    #[test]
    fn http_strings_under_data_are_urls() {
        let json = json!({ "data": "https://cdn.example/via-data.png" });
        assert_eq!(
            extract_payload(&json).unwrap(),
            DepthPayload::Url("https://cdn.example/via-data.png".into())
        );
    }

    #[test]
    fn unusable_shapes_are_rejected() {
        assert!(extract_payload(&json!({})).is_err());
        assert!(extract_payload(&json!({ "status": "pending" })).is_err());
        assert!(extract_payload(&json!({ "data": "!!not base64!!" })).is_err());
    }
}
