//! Gemini `generateContent` response → canonical response.

use aigw_protocol::gemini::{
    Candidate, FinishReason as GeminiFinishReason, GenerateContentResponse, LogprobsResult, Part,
};
use aigw_protocol::openai::chat::{
    chat_completion_object, ChatCompletionChoice, ChatCompletionResponse, ChoiceLogprobs,
    CompletionUsage, FinishReason, FunctionCall, ResponseMessage, ResponseRole, TokenLogprob,
    ToolCall, ToolCallType, TopLogprob,
};

use crate::{TokenUsage, TranslateError};

pub fn transform_response(
    response: GenerateContentResponse,
    model: &str,
) -> Result<(ChatCompletionResponse, TokenUsage), TranslateError> {
    let mut choices = Vec::with_capacity(response.candidates.len());
    for (index, candidate) in response.candidates.into_iter().enumerate() {
        choices.push(map_candidate(candidate, index as u32)?);
    }

    let usage = response
        .usage_metadata
        .map(|metadata| TokenUsage {
            input_tokens: metadata.prompt_token_count,
            output_tokens: metadata.candidates_token_count,
            total_tokens: metadata.total_token_count,
        })
        .unwrap_or_default();

    let openai = ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: chat_completion_object(),
        created: crate::now_unix(),
        model: model.to_string(),
        choices,
        usage: CompletionUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
        },
    };
    Ok((openai, usage))
}

fn map_candidate(candidate: Candidate, index: u32) -> Result<ChatCompletionChoice, TranslateError> {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    if let Some(candidate_content) = &candidate.content {
        content = extract_text(&candidate_content.parts);
        tool_calls = extract_tool_calls(&candidate_content.parts)?;
    }

    let message_content = if content.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(content)
    };

    Ok(ChatCompletionChoice {
        index: candidate.index.unwrap_or(index),
        message: ResponseMessage {
            role: ResponseRole::Assistant,
            content: message_content,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            refusal: None,
        },
        finish_reason: candidate.finish_reason.map(map_finish_reason),
        logprobs: candidate.logprobs_result.map(map_logprobs),
    })
}

pub fn map_finish_reason(reason: GeminiFinishReason) -> FinishReason {
    match reason {
        GeminiFinishReason::Stop => FinishReason::Stop,
        GeminiFinishReason::MaxTokens => FinishReason::Length,
        // Safety and the remaining terminal states surface as filtering.
        _ => FinishReason::ContentFilter,
    }
}

pub fn extract_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect()
}

pub fn extract_tool_calls(parts: &[Part]) -> Result<Vec<ToolCall>, TranslateError> {
    let mut tool_calls = Vec::new();
    for part in parts {
        let Some(function_call) = &part.function_call else {
            continue;
        };
        let arguments = serde_json::to_string(&function_call.args)
            .map_err(|err| TranslateError::InvalidResponse(format!("encoding function args: {err}")))?;
        tool_calls.push(ToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            r#type: ToolCallType::Function,
            function: FunctionCall {
                name: function_call.name.clone(),
                arguments,
            },
        });
    }
    Ok(tool_calls)
}

fn map_logprobs(result: LogprobsResult) -> ChoiceLogprobs {
    let mut content = Vec::with_capacity(result.chosen_candidates.len());
    for (index, chosen) in result.chosen_candidates.into_iter().enumerate() {
        let top_logprobs = result
            .top_candidates
            .get(index)
            .map(|top| {
                top.candidates
                    .iter()
                    .map(|candidate| TopLogprob {
                        token: candidate.token.clone(),
                        logprob: candidate.log_probability,
                    })
                    .collect()
            })
            .unwrap_or_default();
        content.push(TokenLogprob {
            token: chosen.token,
            logprob: chosen.log_probability,
            top_logprobs,
        });
    }
    ChoiceLogprobs { content }
}
