//! OpenAI-to-OpenAI passthrough. The body already speaks the canonical
//! schema, so translation reduces to scraping token usage out of the
//! response for metadata emission.

use aigw_protocol::openai::chat::{ChatCompletionRequest, ChatCompletionResponse};
use aigw_protocol::openai::stream::ChatCompletionChunk;
use aigw_protocol::sse::SseParser;

use crate::{RequestTransform, ResponseTransform, TokenUsage, TranslateError};

#[derive(Default)]
pub struct OpenAiChatTranslator {
    streaming: bool,
    buffered: Vec<u8>,
    sse: SseParser,
}

impl OpenAiChatTranslator {
    pub fn request_body(
        &mut self,
        raw: &[u8],
        request: &ChatCompletionRequest,
        force_body_mutation: bool,
    ) -> Result<RequestTransform, TranslateError> {
        self.streaming = request.is_streaming();
        if !force_body_mutation {
            return Ok(RequestTransform::default());
        }
        let body = raw.to_vec();
        let mut header_mutation = aigw_envoy::HeaderMutation::default();
        aigw_envoy::set_content_length(&mut header_mutation, &body);
        Ok(RequestTransform {
            header_mutation,
            body_mutation: Some(aigw_envoy::replace_body(body)),
        })
    }

    pub fn response_body(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<ResponseTransform, TranslateError> {
        let usage = if self.streaming {
            self.scrape_stream_usage(chunk, end_of_stream)?
        } else {
            self.scrape_buffered_usage(chunk, end_of_stream)?
        };
        // Bytes pass through untouched; only the tallies are produced.
        Ok(ResponseTransform {
            usage,
            ..Default::default()
        })
    }

    fn scrape_buffered_usage(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<TokenUsage, TranslateError> {
        self.buffered.extend_from_slice(chunk);
        if !end_of_stream {
            return Ok(TokenUsage::default());
        }
        let response: ChatCompletionResponse = serde_json::from_slice(&self.buffered)
            .map_err(|err| TranslateError::InvalidResponse(format!("invalid chat completion response: {err}")))?;
        Ok(TokenUsage {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
            total_tokens: response.usage.total_tokens,
        })
    }

    fn scrape_stream_usage(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<TokenUsage, TranslateError> {
        let mut usage = TokenUsage::default();
        let mut events = self.sse.push(chunk);
        if end_of_stream {
            events.extend(self.sse.finish());
        }
        for event in events {
            if event.data.is_empty() || event.is_done() {
                continue;
            }
            let parsed: ChatCompletionChunk = serde_json::from_str(&event.data).map_err(|err| {
                TranslateError::InvalidResponse(format!("invalid chat completion chunk: {err}"))
            })?;
            if let Some(chunk_usage) = parsed.usage {
                usage.accumulate(TokenUsage {
                    input_tokens: chunk_usage.prompt_tokens,
                    output_tokens: chunk_usage.completion_tokens,
                    total_tokens: chunk_usage.total_tokens,
                });
            }
        }
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_protocol::openai::chat::ChatCompletionRequest;

    fn request(stream: bool) -> ChatCompletionRequest {
        serde_json::from_value(serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": stream,
        }))
        .unwrap()
    }

    #[test]
    fn buffered_body_is_untouched_and_usage_extracted() {
        let mut translator = OpenAiChatTranslator::default();
        let raw = serde_json::to_vec(&request(false)).unwrap();
        let transform = translator.request_body(&raw, &request(false), false).unwrap();
        assert!(transform.body_mutation.is_none());
        assert!(transform.header_mutation.set_headers.is_empty());

        let body = br#"{"id":"c","object":"chat.completion","created":1,"model":"m",
            "choices":[{"index":0,"message":{"role":"assistant","content":"hey"},"finish_reason":"stop"}],
            "usage":{"prompt_tokens":2,"completion_tokens":4,"total_tokens":6}}"#;
        let out = translator.response_body(body, true).unwrap();
        assert!(out.body_mutation.is_none());
        assert_eq!(out.usage.total_tokens, 6);
    }

    #[test]
    fn buffered_usage_waits_for_end_of_stream() {
        let mut translator = OpenAiChatTranslator::default();
        let raw = serde_json::to_vec(&request(false)).unwrap();
        translator.request_body(&raw, &request(false), false).unwrap();

        let body = br#"{"choices":[],"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}}"#;
        let first = translator.response_body(&body[..10], false).unwrap();
        assert!(first.usage.is_zero());
        let second = translator.response_body(&body[10..], true).unwrap();
        assert_eq!(second.usage.total_tokens, 2);
    }

    #[test]
    fn streaming_usage_from_final_chunk() {
        let mut translator = OpenAiChatTranslator::default();
        let raw = serde_json::to_vec(&request(true)).unwrap();
        translator.request_body(&raw, &request(true), false).unwrap();

        let first = translator
            .response_body(b"data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"h\"}}]}\n\n", false)
            .unwrap();
        assert!(first.usage.is_zero());

        let last = translator
            .response_body(
                b"data: {\"id\":\"c\",\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":5,\"total_tokens\":8}}\n\ndata: [DONE]\n\n",
                true,
            )
            .unwrap();
        assert_eq!(last.usage.output_tokens, 5);
        assert_eq!(last.usage.total_tokens, 8);
    }

    #[test]
    fn retry_re_emits_body() {
        let mut translator = OpenAiChatTranslator::default();
        let raw = serde_json::to_vec(&request(false)).unwrap();
        let transform = translator.request_body(&raw, &request(false), true).unwrap();
        assert!(transform.body_mutation.is_some());
        let lengths: Vec<&[u8]> = transform
            .header_mutation
            .set_headers
            .iter()
            .filter(|option| option.header.as_ref().unwrap().key == "content-length")
            .map(|option| option.header.as_ref().unwrap().raw_value.as_slice())
            .collect();
        assert_eq!(lengths, vec![raw.len().to_string().as_bytes()]);
    }

    #[test]
    fn malformed_buffered_response_is_rejected() {
        let mut translator = OpenAiChatTranslator::default();
        let raw = serde_json::to_vec(&request(false)).unwrap();
        translator.request_body(&raw, &request(false), false).unwrap();
        assert!(matches!(
            translator.response_body(b"not json", true),
            Err(TranslateError::InvalidResponse(_))
        ));
    }
}
