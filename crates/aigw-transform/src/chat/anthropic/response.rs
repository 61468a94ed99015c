//! Anthropic Messages response → canonical response. Unknown stop reasons
//! are a hard error so silent misclassification never reaches clients.

use aigw_protocol::anthropic::{MessagesResponse, ResponseContentBlock};
use aigw_protocol::openai::chat::{
    chat_completion_object, ChatCompletionChoice, ChatCompletionResponse, CompletionUsage,
    FinishReason, FunctionCall, ResponseMessage, ResponseRole, ToolCall, ToolCallType,
};

use crate::{TokenUsage, TranslateError};

pub fn transform_response(
    response: MessagesResponse,
    model: &str,
) -> Result<(ChatCompletionResponse, TokenUsage), TranslateError> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            ResponseContentBlock::Text { text: part } => text.push_str(&part),
            ResponseContentBlock::ToolUse { id, name, input } => {
                let arguments = serde_json::to_string(&input).map_err(|err| {
                    TranslateError::InvalidResponse(format!("encoding tool input: {err}"))
                })?;
                tool_calls.push(ToolCall {
                    id,
                    r#type: ToolCallType::Function,
                    function: FunctionCall { name, arguments },
                });
            }
            ResponseContentBlock::Thinking { .. } => {}
        }
    }

    let finish_reason = response
        .stop_reason
        .as_deref()
        .map(map_stop_reason)
        .transpose()?;

    let usage = TokenUsage {
        input_tokens: response.usage.input_tokens,
        output_tokens: response.usage.output_tokens,
        total_tokens: response.usage.input_tokens + response.usage.output_tokens,
    };

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };

    let openai = ChatCompletionResponse {
        id: response.id,
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
            finish_reason,
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

fn map_stop_reason(reason: &str) -> Result<FinishReason, TranslateError> {
    match reason {
        "end_turn" | "stop_sequence" | "pause_turn" => Ok(FinishReason::Stop),
        "max_tokens" => Ok(FinishReason::Length),
        "tool_use" => Ok(FinishReason::ToolCalls),
        "refusal" => Ok(FinishReason::ContentFilter),
        other => Err(TranslateError::InvalidResponse(format!(
            "unknown anthropic stop reason: {other}"
        ))),
    }
}
