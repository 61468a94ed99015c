//! Gemini `streamGenerateContent?alt=sse` → canonical SSE chunks.
//!
//! Gemini streams SSE `data:` events whose payloads are full
//! `GenerateContentResponse` objects with cumulative usage; the state keeps
//! the last cumulative tallies so only deltas are reported upward.

use aigw_protocol::gemini::GenerateContentResponse;
use aigw_protocol::openai::chat::CompletionUsage;
use aigw_protocol::openai::stream::{
    chunk_object, ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionCallChunk, ToolCallChunk,
};
use aigw_protocol::sse::{self, SseParser};

use crate::{ResponseTransform, TokenUsage, TranslateError};

use super::response::{extract_text, map_finish_reason};

pub struct GeminiStreamState {
    sse: SseParser,
    id: String,
    created: i64,
    model: String,
    cumulative: TokenUsage,
    next_tool_index: u32,
}

impl GeminiStreamState {
    pub fn new(model: String) -> Self {
        Self {
            sse: SseParser::new(),
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: crate::now_unix(),
            model,
            cumulative: TokenUsage::default(),
            next_tool_index: 0,
        }
    }

    pub fn push(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<ResponseTransform, TranslateError> {
        let mut events = self.sse.push(chunk);
        if end_of_stream {
            events.extend(self.sse.finish());
        }

        let mut out = Vec::new();
        let mut usage_delta = TokenUsage::default();
        for event in events {
            if event.data.is_empty() || event.is_done() {
                continue;
            }
            let response: GenerateContentResponse =
                serde_json::from_str(&event.data).map_err(|err| {
                    TranslateError::InvalidResponse(format!("invalid gemini stream event: {err}"))
                })?;
            let chunk = self.map_response(response, &mut usage_delta)?;
            let data = serde_json::to_string(&chunk).map_err(|err| {
                TranslateError::InvalidResponse(format!("encoding stream chunk: {err}"))
            })?;
            sse::write_data_event(&mut out, &data);
        }

        if end_of_stream {
            sse::write_done_event(&mut out);
        }

        Ok(ResponseTransform {
            header_mutation: aigw_envoy::HeaderMutation::default(),
            body_mutation: Some(aigw_envoy::replace_body(out)),
            usage: usage_delta,
        })
    }

    fn map_response(
        &mut self,
        response: GenerateContentResponse,
        usage_delta: &mut TokenUsage,
    ) -> Result<ChatCompletionChunk, TranslateError> {
        let mut usage = None;
        if let Some(metadata) = response.usage_metadata {
            let cumulative = TokenUsage {
                input_tokens: metadata.prompt_token_count,
                output_tokens: metadata.candidates_token_count,
                total_tokens: metadata.total_token_count,
            };
            usage_delta.accumulate(TokenUsage {
                input_tokens: cumulative.input_tokens.saturating_sub(self.cumulative.input_tokens),
                output_tokens: cumulative
                    .output_tokens
                    .saturating_sub(self.cumulative.output_tokens),
                total_tokens: cumulative.total_tokens.saturating_sub(self.cumulative.total_tokens),
            });
            self.cumulative = cumulative;
            usage = Some(CompletionUsage {
                prompt_tokens: cumulative.input_tokens,
                completion_tokens: cumulative.output_tokens,
                total_tokens: cumulative.total_tokens,
            });
        }

        let mut choices = Vec::new();
        for (index, candidate) in response.candidates.into_iter().enumerate() {
            let mut delta = ChunkDelta::default();
            if let Some(content) = &candidate.content {
                let text = extract_text(&content.parts);
                if !text.is_empty() {
                    delta.content = Some(text);
                }
                let mut tool_chunks = Vec::new();
                for part in &content.parts {
                    let Some(function_call) = &part.function_call else {
                        continue;
                    };
                    let arguments = serde_json::to_string(&function_call.args).map_err(|err| {
                        TranslateError::InvalidResponse(format!("encoding function args: {err}"))
                    })?;
                    tool_chunks.push(ToolCallChunk {
                        index: self.next_tool_index,
                        id: Some(uuid::Uuid::new_v4().to_string()),
                        r#type: Some("function".to_string()),
                        function: Some(FunctionCallChunk {
                            name: Some(function_call.name.clone()),
                            arguments: Some(arguments),
                        }),
                    });
                    self.next_tool_index += 1;
                }
                if !tool_chunks.is_empty() {
                    delta.tool_calls = Some(tool_chunks);
                }
            }
            choices.push(ChunkChoice {
                index: candidate.index.unwrap_or(index as u32),
                delta,
                finish_reason: candidate.finish_reason.map(map_finish_reason),
            });
        }

        Ok(ChatCompletionChunk {
            id: self.id.clone(),
            object: chunk_object(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage,
        })
    }
}
