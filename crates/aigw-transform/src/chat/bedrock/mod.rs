//! OpenAI ↔ AWS Bedrock Converse translation.

use aigw_protocol::bedrock::ConverseResponse;
use aigw_protocol::openai::chat::ChatCompletionRequest;

use crate::{RequestTransform, ResponseTransform, TranslateError};

pub mod request;
pub mod response;
pub mod stream;

#[derive(Default)]
pub struct BedrockChatTranslator {
    streaming: bool,
    model: String,
    buffered: Vec<u8>,
    stream_state: Option<stream::BedrockStreamState>,
}

impl BedrockChatTranslator {
    pub fn request_body(
        &mut self,
        request: &ChatCompletionRequest,
    ) -> Result<RequestTransform, TranslateError> {
        self.streaming = request.is_streaming();
        self.model = request.model.clone();

        let converse = request::transform_request(request)?;
        let body = serde_json::to_vec(&converse)
            .map_err(|err| TranslateError::InvalidRequest(format!("encoding converse request: {err}")))?;
        let verb = if self.streaming { "converse-stream" } else { "converse" };
        let path = format!("/model/{}/{verb}", request.model);

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
                .get_or_insert_with(|| stream::BedrockStreamState::new(self.model.clone()));
            return state.push(chunk, end_of_stream);
        }

        self.buffered.extend_from_slice(chunk);
        if !end_of_stream {
            return Ok(ResponseTransform::default());
        }

        let converse: ConverseResponse = serde_json::from_slice(&self.buffered)
            .map_err(|err| TranslateError::InvalidResponse(format!("invalid converse response: {err}")))?;
        let (response, usage) = response::transform_response(converse, &self.model)?;
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
    fn request_rewrites_path_and_body() {
        let request = chat_request(serde_json::json!({
            "model": "us.meta.llama3-2-1b-instruct-v1:0",
            "messages": [{"role": "user", "content": "hi"}],
        }));
        let mut translator = BedrockChatTranslator::default();
        let transform = translator.request_body(&request).unwrap();

        assert_eq!(
            mutation_header(&transform.header_mutation, ":path").unwrap(),
            "/model/us.meta.llama3-2-1b-instruct-v1:0/converse"
        );
        let Some(Mutation::Body(body)) = transform.body_mutation.unwrap().mutation else {
            panic!("expected body mutation");
        };
        assert_eq!(
            mutation_header(&transform.header_mutation, "content-length").unwrap(),
            body.len().to_string()
        );
        let converse: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(converse["messages"][0]["role"], "user");
        assert_eq!(converse["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn streaming_request_targets_converse_stream() {
        let request = chat_request(serde_json::json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        }));
        let mut translator = BedrockChatTranslator::default();
        let transform = translator.request_body(&request).unwrap();
        assert_eq!(
            mutation_header(&transform.header_mutation, ":path").unwrap(),
            "/model/m/converse-stream"
        );
    }

    #[test]
    fn buffered_response_round_trip() {
        let request = chat_request(serde_json::json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
        }));
        let mut translator = BedrockChatTranslator::default();
        translator.request_body(&request).unwrap();

        let upstream = serde_json::json!({
            "output": {"message": {"role": "assistant", "content": [{"text": "hello there"}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 2, "outputTokens": 7, "totalTokens": 9}
        });
        let out = translator
            .response_body(&serde_json::to_vec(&upstream).unwrap(), true)
            .unwrap();
        assert_eq!(out.usage.total_tokens, 9);

        let Some(Mutation::Body(body)) = out.body_mutation.unwrap().mutation else {
            panic!("expected body mutation");
        };
        assert_eq!(
            mutation_header(&out.header_mutation, "content-length").unwrap(),
            body.len().to_string()
        );
        let translated: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(translated["choices"][0]["message"]["content"], "hello there");
        assert_eq!(translated["choices"][0]["finish_reason"], "stop");
        assert_eq!(translated["usage"]["total_tokens"], 9);
    }

    #[test]
    fn malformed_buffered_response_is_rejected() {
        let request = chat_request(serde_json::json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
        }));
        let mut translator = BedrockChatTranslator::default();
        translator.request_body(&request).unwrap();
        assert!(matches!(
            translator.response_body(b"\x00\x01 not json", true),
            Err(TranslateError::InvalidResponse(_))
        ));
    }
}
