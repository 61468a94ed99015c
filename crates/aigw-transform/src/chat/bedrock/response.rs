//! Bedrock Converse response → canonical response.

use aigw_protocol::bedrock::{ContentBlock, ConverseResponse, StopReason};
use aigw_protocol::openai::chat::{
    chat_completion_object, ChatCompletionChoice, ChatCompletionResponse, CompletionUsage,
    FinishReason, FunctionCall, ResponseMessage, ResponseRole, ToolCall, ToolCallType,
};

use crate::{TokenUsage, TranslateError};

pub fn transform_response(
    response: ConverseResponse,
    model: &str,
) -> Result<(ChatCompletionResponse, TokenUsage), TranslateError> {
    let message = response
        .output
        .and_then(|output| output.message)
        .ok_or_else(|| TranslateError::InvalidResponse("converse response has no output message".to_string()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in message.content {
        match block {
            ContentBlock::Text(part) => text.push_str(&part),
            ContentBlock::ToolUse(tool_use) => {
                let arguments = serde_json::to_string(&tool_use.input).map_err(|err| {
                    TranslateError::InvalidResponse(format!("encoding tool input: {err}"))
                })?;
                tool_calls.push(ToolCall {
                    id: tool_use.tool_use_id,
                    r#type: ToolCallType::Function,
                    function: FunctionCall {
                        name: tool_use.name,
                        arguments,
                    },
                });
            }
            ContentBlock::Image(_) | ContentBlock::ToolResult(_) => {
                return Err(TranslateError::InvalidResponse(
                    "unexpected content block in converse output".to_string(),
                ));
            }
        }
    }

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };

    let usage = TokenUsage {
        input_tokens: response.usage.input_tokens,
        output_tokens: response.usage.output_tokens,
        total_tokens: response.usage.total_tokens,
    };

    let openai = ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: chat_completion_object(),
        created: crate::now_unix(),
        model: model.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ResponseMessage {
                role: ResponseRole::Assistant,
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                refusal: None,
            },
            finish_reason: response.stop_reason.map(map_stop_reason),
            logprobs: None,
        }],
        usage: CompletionUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
        },
    };
    Ok((openai, usage))
}

pub fn map_stop_reason(reason: StopReason) -> FinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::GuardrailIntervened | StopReason::ContentFiltered => FinishReason::ContentFilter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_tool_use_output() {
        let response: ConverseResponse = serde_json::from_value(serde_json::json!({
            "output": {"message": {"role": "assistant", "content": [
                {"toolUse": {"toolUseId": "t1", "name": "f", "input": {"a": 1}}}
            ]}},
            "stopReason": "tool_use",
            "usage": {"inputTokens": 1, "outputTokens": 2, "totalTokens": 3}
        }))
        .unwrap();
        let (openai, usage) = transform_response(response, "m").unwrap();
        let choice = &openai.choices[0];
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert!(choice.message.content.is_none());
        let tool_call = &choice.message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tool_call.id, "t1");
        assert_eq!(tool_call.function.arguments, "{\"a\":1}");
        assert_eq!(usage.total_tokens, 3);
    }

    #[test]
    fn stop_reason_table() {
        assert_eq!(map_stop_reason(StopReason::EndTurn), FinishReason::Stop);
        assert_eq!(map_stop_reason(StopReason::StopSequence), FinishReason::Stop);
        assert_eq!(map_stop_reason(StopReason::MaxTokens), FinishReason::Length);
        assert_eq!(map_stop_reason(StopReason::ToolUse), FinishReason::ToolCalls);
        assert_eq!(
            map_stop_reason(StopReason::ContentFiltered),
            FinishReason::ContentFilter
        );
    }

    #[test]
    fn missing_output_is_an_error() {
        let response: ConverseResponse =
            serde_json::from_value(serde_json::json!({"usage": {}})).unwrap();
        assert!(matches!(
            transform_response(response, "m"),
            Err(TranslateError::InvalidResponse(_))
        ));
    }
}
