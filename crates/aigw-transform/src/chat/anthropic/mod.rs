//! OpenAI ↔ Anthropic Messages on Vertex AI (`rawPredict`).

use aigw_protocol::anthropic::MessagesResponse;
use aigw_protocol::openai::chat::ChatCompletionRequest;

use crate::{RequestTransform, ResponseTransform, TranslateError};

pub mod request;
pub mod response;

pub const MODEL_PUBLISHER: &str = "anthropic";
pub const RAW_PREDICT_METHOD: &str = "rawPredict";

#[derive(Default)]
pub struct AnthropicChatTranslator {
    model: String,
    buffered: Vec<u8>,
}

impl AnthropicChatTranslator {
    pub fn request_body(
        &mut self,
        request: &ChatCompletionRequest,
    ) -> Result<RequestTransform, TranslateError> {
        self.model = request.model.clone();

        let anthropic = request::transform_request(request)?;
        let body = serde_json::to_vec(&anthropic).map_err(|err| {
            TranslateError::InvalidRequest(format!("encoding anthropic request: {err}"))
        })?;
        let path = format!(
            "publishers/{MODEL_PUBLISHER}/models/{}:{RAW_PREDICT_METHOD}",
            request.model
        );

        let (header_mutation, body_mutation) = aigw_envoy::request_mutations(&path, body);
        Ok(RequestTransform {
            header_mutation,
            body_mutation: Some(body_mutation),
        })
    }

    pub fn response_body(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<ResponseTransform, TranslateError> {
        self.buffered.extend_from_slice(chunk);
        if !end_of_stream {
            return Ok(ResponseTransform::default());
        }

        let anthropic: MessagesResponse = serde_json::from_slice(&self.buffered).map_err(|err| {
            TranslateError::InvalidResponse(format!("invalid anthropic response: {err}"))
        })?;
        let (response, usage) = response::transform_response(anthropic, &self.model)?;
        let body = serde_json::to_vec(&response).map_err(|err| {
            TranslateError::InvalidResponse(format!("encoding chat completion: {err}"))
        })?;

        let mut header_mutation = aigw_envoy::HeaderMutation::default();
        aigw_envoy::set_content_length(&mut header_mutation, &body);
        aigw_envoy::set_header(&mut header_mutation, "content-type", "application/json");
        Ok(ResponseTransform {
            header_mutation,
            body_mutation: Some(aigw_envoy::replace_body(body)),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_envoy::body_mutation::Mutation;

    fn chat_request(value: serde_json::Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    fn mutation_header(mutation: &aigw_envoy::HeaderMutation, key: &str) -> Option<String> {
        mutation
            .set_headers
            .iter()
            .map(|option| option.header.as_ref().unwrap())
            .find(|header| header.key == key)
            .map(|header| String::from_utf8_lossy(&header.raw_value).into_owned())
    }

    #[test]
    fn request_targets_raw_predict_with_vertex_body() {
        let request = chat_request(serde_json::json!({
            "model": "claude-3-5-haiku",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10,
            "temperature": 0.5,
        }));
        let mut translator = AnthropicChatTranslator::default();
        let transform = translator.request_body(&request).unwrap();

        assert_eq!(
            mutation_header(&transform.header_mutation, ":path").unwrap(),
            "publishers/anthropic/models/claude-3-5-haiku:rawPredict"
        );
        let Some(Mutation::Body(body)) = transform.body_mutation.unwrap().mutation else {
            panic!("expected body mutation");
        };
        assert_eq!(
            mutation_header(&transform.header_mutation, "content-length").unwrap(),
            body.len().to_string()
        );
        let vertex: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(vertex["anthropic_version"], "vertex-2023-10-16");
        assert!(vertex.get("model").is_none());
        assert_eq!(vertex["max_tokens"], 10);
        assert_eq!(vertex["temperature"], 0.5);
    }

    #[test]
    fn streaming_is_rejected() {
        let request = chat_request(serde_json::json!({
            "model": "claude-3-5-haiku",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10,
            "stream": true,
        }));
        let mut translator = AnthropicChatTranslator::default();
        let err = translator.request_body(&request).unwrap_err();
        assert!(err.to_string().contains("streaming is not yet supported"));
    }

    #[test]
    fn high_temperature_is_rejected_with_value_in_message() {
        let request = chat_request(serde_json::json!({
            "model": "claude-3-5-haiku",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10,
            "temperature": 1.5,
        }));
        let mut translator = AnthropicChatTranslator::default();
        let err = translator.request_body(&request).unwrap_err();
        assert!(err
            .to_string()
            .contains("temperature 1.50 is not supported by Anthropic"));
    }

    #[test]
    fn buffered_response_round_trip() {
        let request = chat_request(serde_json::json!({
            "model": "claude-3-5-haiku",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10,
        }));
        let mut translator = AnthropicChatTranslator::default();
        translator.request_body(&request).unwrap();

        let upstream = serde_json::json!({
            "id": "msg_1", "type": "message", "role": "assistant",
            "content": [{"type": "text", "text": "hello"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 4, "output_tokens": 2}
        });
        let out = translator
            .response_body(&serde_json::to_vec(&upstream).unwrap(), true)
            .unwrap();
        assert_eq!(out.usage.input_tokens, 4);
        assert_eq!(out.usage.total_tokens, 6);
        let Some(Mutation::Body(body)) = out.body_mutation.unwrap().mutation else {
            panic!("expected body mutation");
        };
        let translated: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(translated["choices"][0]["message"]["content"], "hello");
        assert_eq!(translated["choices"][0]["finish_reason"], "stop");
    }
}
