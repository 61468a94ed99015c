//! Schema translators: bidirectional converters between the canonical
//! OpenAI wire format and each backend's native format.
//!
//! A translator variant is selected per stream from the backend schema and
//! endpoint. Request translation rewrites `:path` and the body; response
//! translation rewrites the backend bytes back into the canonical shape and
//! reports token-usage deltas. Every emitted body mutation is paired with a
//! matching `content-length` header mutation.

use aigw_envoy::{BodyMutation, HeaderMutation};
use aigw_filterapi::{ApiSchemaName, VersionedApiSchema};
use aigw_protocol::openai::chat::ChatCompletionRequest;
use aigw_protocol::openai::embeddings::EmbeddingsRequest;
use aigw_protocol::openai::error::ErrorEnvelope;

pub mod chat;
pub mod embeddings;

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    /// The request asks for something the selected backend cannot do.
    #[error("{0}")]
    Unsupported(String),
    /// The canonical request violates a translator invariant.
    #[error("{0}")]
    InvalidRequest(String),
    /// The backend response cannot be parsed or mapped.
    #[error("{0}")]
    InvalidResponse(String),
}

/// Running token tallies for one stream. Response translators return the
/// delta observed per call; the processor accumulates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn accumulate(&mut self, delta: TokenUsage) {
        self.input_tokens += delta.input_tokens;
        self.output_tokens += delta.output_tokens;
        self.total_tokens += delta.total_tokens;
    }

    pub fn is_zero(&self) -> bool {
        *self == TokenUsage::default()
    }
}

#[derive(Debug, Default)]
pub struct RequestTransform {
    pub header_mutation: HeaderMutation,
    pub body_mutation: Option<BodyMutation>,
}

#[derive(Debug, Default)]
pub struct ResponseTransform {
    pub header_mutation: HeaderMutation,
    pub body_mutation: Option<BodyMutation>,
    pub usage: TokenUsage,
}

/// Lower-cased response headers as decoded from the ext_proc header map.
pub type ResponseHeaders = std::collections::HashMap<String, String>;

pub use chat::ChatTranslator;
pub use embeddings::EmbeddingsTranslator;

/// Maps an upstream error body onto the canonical envelope. Best-effort by
/// contract: unparseable bodies surface as their raw text.
pub fn translate_error_response(status: u16, body: &[u8]) -> ResponseTransform {
    let message = extract_upstream_error_message(body);
    let envelope = ErrorEnvelope::new("upstream_error", message, status).to_bytes();
    let mut header_mutation = HeaderMutation::default();
    aigw_envoy::set_content_length(&mut header_mutation, &envelope);
    aigw_envoy::set_header(&mut header_mutation, "content-type", "application/json");
    ResponseTransform {
        header_mutation,
        body_mutation: Some(aigw_envoy::replace_body(envelope)),
        usage: TokenUsage::default(),
    }
}

fn extract_upstream_error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        for path in [&["error", "message"][..], &["message"][..]] {
            let mut cursor = &value;
            let mut found = true;
            for key in path {
                match cursor.get(key) {
                    Some(next) => cursor = next,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            if found {
                if let Some(text) = cursor.as_str() {
                    return text.to_string();
                }
            }
        }
    }
    String::from_utf8_lossy(body).into_owned()
}

/// Builds the chat translator for a backend schema.
pub fn chat_translator_for(schema: &VersionedApiSchema) -> Result<ChatTranslator, TranslateError> {
    ChatTranslator::new(schema)
}

/// Builds the embeddings translator for a backend schema.
pub fn embeddings_translator_for(
    schema: &VersionedApiSchema,
) -> Result<EmbeddingsTranslator, TranslateError> {
    EmbeddingsTranslator::new(schema)
}

pub(crate) fn unsupported_schema(endpoint: &str, schema: ApiSchemaName) -> TranslateError {
    TranslateError::Unsupported(format!("{endpoint} is not supported for schema {schema:?}"))
}

pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

pub fn decode_chat_request(raw: &[u8]) -> Result<ChatCompletionRequest, TranslateError> {
    serde_json::from_slice(raw)
        .map_err(|err| TranslateError::InvalidRequest(format!("invalid chat completion request: {err}")))
}

pub fn decode_embeddings_request(raw: &[u8]) -> Result<EmbeddingsRequest, TranslateError> {
    serde_json::from_slice(raw)
        .map_err(|err| TranslateError::InvalidRequest(format!("invalid embeddings request: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_wraps_upstream_message() {
        let out = translate_error_response(429, br#"{"error":{"message":"slow down"}}"#);
        let Some(aigw_envoy::body_mutation::Mutation::Body(body)) =
            out.body_mutation.unwrap().mutation
        else {
            panic!("expected body replacement");
        };
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["error"]["message"], "slow down");
        assert_eq!(envelope["error"]["code"], "429");
    }

    #[test]
    fn error_response_tolerates_plain_text() {
        let out = translate_error_response(503, b"upstream unavailable");
        let Some(aigw_envoy::body_mutation::Mutation::Body(body)) =
            out.body_mutation.unwrap().mutation
        else {
            panic!("expected body replacement");
        };
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["error"]["message"], "upstream unavailable");
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total.accumulate(TokenUsage {
            input_tokens: 2,
            output_tokens: 3,
            total_tokens: 5,
        });
        total.accumulate(TokenUsage {
            input_tokens: 0,
            output_tokens: 4,
            total_tokens: 4,
        });
        assert_eq!(total.input_tokens, 2);
        assert_eq!(total.output_tokens, 7);
        assert_eq!(total.total_tokens, 9);
    }
}
