//! Bedrock ConverseStream → canonical SSE chunks.
//!
//! The inbound bytes are AWS event-stream frames; each decoded event maps
//! to one `chat.completion.chunk` rendered as a `data:` SSE event. The
//! frame decoder retains partial frames between chunks.

use std::collections::BTreeMap;

use aigw_protocol::bedrock::eventstream::FrameDecoder;
use aigw_protocol::bedrock::stream::{
    ContentBlockDelta, ContentBlockDeltaEvent, ContentBlockStart, ContentBlockStartEvent,
    MessageStartEvent, MessageStopEvent, MetadataEvent,
};
use aigw_protocol::openai::chat::CompletionUsage;
use aigw_protocol::openai::stream::{
    chunk_object, ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionCallChunk, ToolCallChunk,
};
use aigw_protocol::sse;

use crate::{ResponseTransform, TokenUsage, TranslateError};

use super::response::map_stop_reason;

use crate::now_unix;

pub struct BedrockStreamState {
    decoder: FrameDecoder,
    id: String,
    created: i64,
    model: String,
    /// Bedrock content-block index → OpenAI tool-call index.
    tool_indices: BTreeMap<u32, u32>,
    next_tool_index: u32,
}

impl BedrockStreamState {
    pub fn new(model: String) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: now_unix(),
            model,
            tool_indices: BTreeMap::new(),
            next_tool_index: 0,
        }
    }

    pub fn push(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<ResponseTransform, TranslateError> {
        self.decoder.push(chunk);
        let mut out = Vec::new();
        let mut usage = TokenUsage::default();

        while let Some(frame) = self
            .decoder
            .next_frame()
            .map_err(|err| TranslateError::InvalidResponse(format!("invalid event stream: {err}")))?
        {
            if frame.header_str(":message-type") == Some("exception") {
                let detail = String::from_utf8_lossy(&frame.payload).into_owned();
                return Err(TranslateError::InvalidResponse(format!(
                    "bedrock stream exception: {detail}"
                )));
            }
            let Some(event_type) = frame.event_type().map(str::to_string) else {
                continue;
            };
            if let Some(chunk) = self.map_event(&event_type, &frame.payload, &mut usage)? {
                let data = serde_json::to_string(&chunk).map_err(|err| {
                    TranslateError::InvalidResponse(format!("encoding stream chunk: {err}"))
                })?;
                sse::write_data_event(&mut out, &data);
            }
        }

        if end_of_stream {
            sse::write_done_event(&mut out);
        }

        // Always replace the body: the inbound bytes are binary frames the
        // client must never see.
        Ok(ResponseTransform {
            header_mutation: aigw_envoy::HeaderMutation::default(),
            body_mutation: Some(aigw_envoy::replace_body(out)),
            usage,
        })
    }

    fn map_event(
        &mut self,
        event_type: &str,
        payload: &[u8],
        usage: &mut TokenUsage,
    ) -> Result<Option<ChatCompletionChunk>, TranslateError> {
        let chunk = match event_type {
            "messageStart" => {
                let _: MessageStartEvent = decode(payload)?;
                self.chunk(
                    ChunkDelta {
                        role: Some("assistant".to_string()),
                        ..Default::default()
                    },
                    None,
                    None,
                )
            }
            "contentBlockStart" => {
                let event: ContentBlockStartEvent = decode(payload)?;
                match event.start {
                    Some(ContentBlockStart::ToolUse(start)) => {
                        let tool_index = self.next_tool_index;
                        self.next_tool_index += 1;
                        self.tool_indices.insert(event.content_block_index, tool_index);
                        self.chunk(
                            ChunkDelta {
                                tool_calls: Some(vec![ToolCallChunk {
                                    index: tool_index,
                                    id: Some(start.tool_use_id),
                                    r#type: Some("function".to_string()),
                                    function: Some(FunctionCallChunk {
                                        name: Some(start.name),
                                        arguments: Some(String::new()),
                                    }),
                                }]),
                                ..Default::default()
                            },
                            None,
                            None,
                        )
                    }
                    None => return Ok(None),
                }
            }
            "contentBlockDelta" => {
                let event: ContentBlockDeltaEvent = decode(payload)?;
                match event.delta {
                    ContentBlockDelta::Text(text) => self.chunk(
                        ChunkDelta {
                            content: Some(text),
                            ..Default::default()
                        },
                        None,
                        None,
                    ),
                    ContentBlockDelta::ToolUse(delta) => {
                        let tool_index = self
                            .tool_indices
                            .get(&event.content_block_index)
                            .copied()
                            .ok_or_else(|| {
                                TranslateError::InvalidResponse(format!(
                                    "tool delta for unknown content block {}",
                                    event.content_block_index
                                ))
                            })?;
                        self.chunk(
                            ChunkDelta {
                                tool_calls: Some(vec![ToolCallChunk {
                                    index: tool_index,
                                    id: None,
                                    r#type: None,
                                    function: Some(FunctionCallChunk {
                                        name: None,
                                        arguments: Some(delta.input),
                                    }),
                                }]),
                                ..Default::default()
                            },
                            None,
                            None,
                        )
                    }
                }
            }
            "contentBlockStop" => return Ok(None),
            "messageStop" => {
                let event: MessageStopEvent = decode(payload)?;
                self.chunk(ChunkDelta::default(), Some(map_stop_reason(event.stop_reason)), None)
            }
            "metadata" => {
                let event: MetadataEvent = decode(payload)?;
                *usage = TokenUsage {
                    input_tokens: event.usage.input_tokens,
                    output_tokens: event.usage.output_tokens,
                    total_tokens: event.usage.total_tokens,
                };
                self.chunk(
                    ChunkDelta::default(),
                    None,
                    Some(CompletionUsage {
                        prompt_tokens: event.usage.input_tokens,
                        completion_tokens: event.usage.output_tokens,
                        total_tokens: event.usage.total_tokens,
                    }),
                )
            }
            _ => return Ok(None),
        };
        Ok(Some(chunk))
    }

    fn chunk(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<aigw_protocol::openai::chat::FinishReason>,
        usage: Option<CompletionUsage>,
    ) -> ChatCompletionChunk {
        let choices = if delta == ChunkDelta::default() && finish_reason.is_none() {
            Vec::new()
        } else {
            vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }]
        };
        ChatCompletionChunk {
            id: self.id.clone(),
            object: chunk_object(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, TranslateError> {
    serde_json::from_slice(payload)
        .map_err(|err| TranslateError::InvalidResponse(format!("invalid stream event payload: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_envoy::body_mutation::Mutation;
    use aigw_protocol::bedrock::eventstream::encode_frame;
    use aigw_protocol::sse::SseParser;

    fn event(event_type: &str, payload: serde_json::Value) -> Vec<u8> {
        encode_frame(
            &[(":message-type", "event"), (":event-type", event_type)],
            payload.to_string().as_bytes(),
        )
    }

    fn body_of(out: ResponseTransform) -> Vec<u8> {
        match out.body_mutation.unwrap().mutation.unwrap() {
            Mutation::Body(body) => body,
            other => panic!("unexpected mutation: {other:?}"),
        }
    }

    #[test]
    fn text_stream_maps_to_sse_chunks() {
        let mut state = BedrockStreamState::new("m".to_string());
        let mut raw = event("messageStart", serde_json::json!({"role": "assistant"}));
        raw.extend(event(
            "contentBlockDelta",
            serde_json::json!({"contentBlockIndex": 0, "delta": {"text": "hel"}}),
        ));
        raw.extend(event(
            "contentBlockDelta",
            serde_json::json!({"contentBlockIndex": 0, "delta": {"text": "lo"}}),
        ));
        raw.extend(event("messageStop", serde_json::json!({"stopReason": "end_turn"})));
        raw.extend(event(
            "metadata",
            serde_json::json!({"usage": {"inputTokens": 2, "outputTokens": 3, "totalTokens": 5}}),
        ));

        let out = state.push(&raw, true).unwrap();
        assert_eq!(out.usage.total_tokens, 5);
        let body = body_of(out);

        let mut parser = SseParser::new();
        let events = parser.push(&body);
        assert!(events.last().unwrap().is_done());
        let chunks: Vec<ChatCompletionChunk> = events[..events.len() - 1]
            .iter()
            .map(|event| serde_json::from_str(&event.data).unwrap())
            .collect();
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("hel"));
        assert_eq!(chunks[2].choices[0].delta.content.as_deref(), Some("lo"));
        assert_eq!(
            chunks[3].choices[0].finish_reason,
            Some(aigw_protocol::openai::chat::FinishReason::Stop)
        );
        assert_eq!(chunks[4].usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn usage_is_monotonic_across_pushes() {
        let mut state = BedrockStreamState::new("m".to_string());
        let first = state
            .push(
                &event(
                    "contentBlockDelta",
                    serde_json::json!({"contentBlockIndex": 0, "delta": {"text": "x"}}),
                ),
                false,
            )
            .unwrap();
        assert!(first.usage.is_zero());

        let second = state
            .push(
                &event(
                    "metadata",
                    serde_json::json!({"usage": {"inputTokens": 1, "outputTokens": 1, "totalTokens": 2}}),
                ),
                true,
            )
            .unwrap();
        assert_eq!(second.usage.total_tokens, 2);
    }

    #[test]
    fn tool_stream_assigns_openai_indices() {
        let mut state = BedrockStreamState::new("m".to_string());
        let mut raw = event(
            "contentBlockStart",
            serde_json::json!({"contentBlockIndex": 1,
                "start": {"toolUse": {"toolUseId": "t1", "name": "f"}}}),
        );
        raw.extend(event(
            "contentBlockDelta",
            serde_json::json!({"contentBlockIndex": 1, "delta": {"toolUse": {"input": "{\"a\":"}}}),
        ));
        raw.extend(event(
            "contentBlockDelta",
            serde_json::json!({"contentBlockIndex": 1, "delta": {"toolUse": {"input": "1}"}}}),
        ));

        let body = body_of(state.push(&raw, false).unwrap());
        let mut parser = SseParser::new();
        let chunks: Vec<ChatCompletionChunk> = parser
            .push(&body)
            .iter()
            .map(|event| serde_json::from_str(&event.data).unwrap())
            .collect();
        let start = &chunks[0].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(start.index, 0);
        assert_eq!(start.id.as_deref(), Some("t1"));
        let delta = &chunks[1].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(delta.function.as_ref().unwrap().arguments.as_deref(), Some("{\"a\":"));
    }

    #[test]
    fn partial_frame_is_retained() {
        let mut state = BedrockStreamState::new("m".to_string());
        let raw = event(
            "contentBlockDelta",
            serde_json::json!({"contentBlockIndex": 0, "delta": {"text": "split"}}),
        );
        let first = state.push(&raw[..9], false).unwrap();
        assert!(body_of(first).is_empty());
        let second = state.push(&raw[9..], false).unwrap();
        assert!(!body_of(second).is_empty());
    }

    #[test]
    fn exception_frames_fail_translation() {
        let mut state = BedrockStreamState::new("m".to_string());
        let raw = encode_frame(
            &[(":message-type", "exception"), (":exception-type", "throttlingException")],
            br#"{"message":"slow down"}"#,
        );
        assert!(matches!(
            state.push(&raw, false),
            Err(TranslateError::InvalidResponse(_))
        ));
    }
}
