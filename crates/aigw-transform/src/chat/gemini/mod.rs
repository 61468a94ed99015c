//! OpenAI ↔ GCP Gemini `generateContent` translation. The request `:path`
//! is emitted as a publisher suffix; the GCP auth handler expands it to the
//! regional Vertex endpoint.

use aigw_protocol::gemini::GenerateContentResponse;
use aigw_protocol::openai::chat::ChatCompletionRequest;

use crate::{RequestTransform, ResponseTransform, TranslateError};

pub mod request;
pub mod response;
pub mod stream;

pub const MODEL_PUBLISHER: &str = "google";
pub const GENERATE_CONTENT_METHOD: &str = "generateContent";
pub const STREAM_GENERATE_CONTENT_METHOD: &str = "streamGenerateContent";

#[derive(Default)]
pub struct GeminiChatTranslator {
    streaming: bool,
    model: String,
    buffered: Vec<u8>,
    stream_state: Option<stream::GeminiStreamState>,
}

impl GeminiChatTranslator {
    pub fn request_body(
        &mut self,
        request: &ChatCompletionRequest,
    ) -> Result<RequestTransform, TranslateError> {
        self.streaming = request.is_streaming();
        self.model = request.model.clone();

        let gemini = request::transform_request(request)?;
        let body = serde_json::to_vec(&gemini)
            .map_err(|err| TranslateError::InvalidRequest(format!("encoding gemini request: {err}")))?;

        let path = if self.streaming {
            format!(
                "publishers/{MODEL_PUBLISHER}/models/{}:{STREAM_GENERATE_CONTENT_METHOD}?alt=sse",
                request.model
            )
        } else {
            format!(
                "publishers/{MODEL_PUBLISHER}/models/{}:{GENERATE_CONTENT_METHOD}",
                request.model
            )
        };

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
        if self.streaming {
            let state = self
                .stream_state
                .get_or_insert_with(|| stream::GeminiStreamState::new(self.model.clone()));
            return state.push(chunk, end_of_stream);
        }

        self.buffered.extend_from_slice(chunk);
        if !end_of_stream {
            return Ok(ResponseTransform::default());
        }

        let gemini: GenerateContentResponse = serde_json::from_slice(&self.buffered)
            .map_err(|err| TranslateError::InvalidResponse(format!("invalid gemini response: {err}")))?;
        let (response, usage) = response::transform_response(gemini, &self.model)?;
        let body = serde_json::to_vec(&response)
            .map_err(|err| TranslateError::InvalidResponse(format!("encoding chat completion: {err}")))?;

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

    fn mutation_header(mutation: &aigw_envoy::HeaderMutation, key: &str) -> Option<String> {
        mutation
            .set_headers
            .iter()
            .map(|option| option.header.as_ref().unwrap())
            .find(|header| header.key == key)
            .map(|header| String::from_utf8_lossy(&header.raw_value).into_owned())
    }

    #[test]
    fn request_emits_publisher_suffix() {
        let request: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gemini-2.0-flash",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();
        let mut translator = GeminiChatTranslator::default();
        let transform = translator.request_body(&request).unwrap();
        assert_eq!(
            mutation_header(&transform.header_mutation, ":path").unwrap(),
            "publishers/google/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn streaming_request_uses_sse_alt() {
        let request: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "g",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        }))
        .unwrap();
        let mut translator = GeminiChatTranslator::default();
        let transform = translator.request_body(&request).unwrap();
        assert_eq!(
            mutation_header(&transform.header_mutation, ":path").unwrap(),
            "publishers/google/models/g:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn buffered_response_round_trip() {
        let request: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "g",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();
        let mut translator = GeminiChatTranslator::default();
        translator.request_body(&request).unwrap();

        let upstream = serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "hey"}]},
                            "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 2, "totalTokenCount": 3}
        });
        let out = translator
            .response_body(&serde_json::to_vec(&upstream).unwrap(), true)
            .unwrap();
        assert_eq!(out.usage.total_tokens, 3);
        let Some(Mutation::Body(body)) = out.body_mutation.unwrap().mutation else {
            panic!("expected body mutation");
        };
        assert_eq!(
            mutation_header(&out.header_mutation, "content-length").unwrap(),
            body.len().to_string()
        );
        let translated: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(translated["choices"][0]["message"]["content"], "hey");
    }
}
