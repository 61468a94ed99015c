//! Canonical request → Anthropic Messages request in the Vertex dialect:
//! `model` is dropped, `anthropic_version` is pinned, and a handful of
//! parameter constraints are enforced up front.

use aigw_protocol::anthropic::{
    ContentBlock, MediaSource, MessageContent, MessageParam, MessageRole, MessagesRequest,
    TextBlock, ToolChoice, ToolParam, ToolResultContent, VERTEX_ANTHROPIC_VERSION,
};
use aigw_protocol::datauri;
use aigw_protocol::openai::chat::{
    AssistantContent, AssistantContentPart, AssistantMessage, ChatCompletionMessage,
    ChatCompletionRequest, ToolChoiceMode, ToolChoiceOption, ToolDefinition, ToolMessage,
    UserContent, UserContentPart, UserMessage,
};

use crate::TranslateError;

use base64::Engine;

/// Applied when neither `max_tokens` nor `max_completion_tokens` is set;
/// the field is mandatory on the Anthropic side.
const DEFAULT_MAX_TOKENS: i64 = 100;

const SUPPORTED_IMAGE_MEDIA_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];

pub fn transform_request(request: &ChatCompletionRequest) -> Result<MessagesRequest, TranslateError> {
    if request.is_streaming() {
        return Err(TranslateError::Unsupported(
            "streaming is not yet supported for GCP Anthropic translation".to_string(),
        ));
    }
    if let Some(temperature) = request.temperature {
        if temperature > 1.0 {
            return Err(TranslateError::Unsupported(format!(
                "temperature {temperature:.2} is not supported by Anthropic (must be between 0.0 and 1.0)"
            )));
        }
    }

    let mut system = Vec::new();
    let mut messages = Vec::new();
    for message in &request.messages {
        match message {
            ChatCompletionMessage::System(msg) => {
                system.push(TextBlock::new(msg.content.joined()));
            }
            ChatCompletionMessage::Developer(msg) => {
                system.push(TextBlock::new(msg.content.joined()));
            }
            ChatCompletionMessage::User(msg) => messages.push(map_user_message(msg)?),
            ChatCompletionMessage::Assistant(msg) => messages.push(map_assistant_message(msg)?),
            ChatCompletionMessage::Tool(msg) => messages.push(map_tool_message(msg)),
        }
    }

    let (tool_choice, disable_parallel) = map_tool_choice(request);

    Ok(MessagesRequest {
        anthropic_version: Some(VERTEX_ANTHROPIC_VERSION.to_string()),
        model: None,
        max_tokens: request.output_token_cap().unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: (!system.is_empty()).then_some(system),
        stop_sequences: request
            .stop
            .clone()
            .map(|stop| stop.into_sequences())
            .filter(|sequences| !sequences.is_empty()),
        stream: None,
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        tools: map_tools(request),
        tool_choice: apply_parallel_override(tool_choice, disable_parallel),
    })
}

fn map_user_message(message: &UserMessage) -> Result<MessageParam, TranslateError> {
    let content = match &message.content {
        UserContent::Text(text) => MessageContent::Text(text.clone()),
        UserContent::Parts(parts) => {
            let mut blocks = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    UserContentPart::Text { text } => {
                        blocks.push(ContentBlock::Text { text: text.clone() });
                    }
                    UserContentPart::ImageUrl { image_url } => {
                        blocks.push(map_image(&image_url.url)?);
                    }
                    UserContentPart::InputAudio { .. } => {
                        return Err(TranslateError::Unsupported(
                            "input audio content not supported yet".to_string(),
                        ));
                    }
                }
            }
            MessageContent::Blocks(blocks)
        }
    };
    Ok(MessageParam {
        role: MessageRole::User,
        content,
    })
}

fn map_image(url: &str) -> Result<ContentBlock, TranslateError> {
    if datauri::is_data_uri(url) {
        let (media_type, bytes) = datauri::parse_data_uri(url).map_err(|err| {
            TranslateError::InvalidRequest(format!("failed to parse image URL: {err}"))
        })?;
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        if media_type == "application/pdf" {
            return Ok(ContentBlock::Document {
                source: MediaSource::Base64 { media_type, data },
            });
        }
        if !SUPPORTED_IMAGE_MEDIA_TYPES.contains(&media_type.as_str()) {
            return Err(TranslateError::InvalidRequest(format!(
                "invalid media_type for image '{media_type}'"
            )));
        }
        return Ok(ContentBlock::Image {
            source: MediaSource::Base64 { media_type, data },
        });
    }
    if url.to_ascii_lowercase().ends_with(".pdf") {
        return Ok(ContentBlock::Document {
            source: MediaSource::Url { url: url.to_string() },
        });
    }
    Ok(ContentBlock::Image {
        source: MediaSource::Url { url: url.to_string() },
    })
}

fn map_assistant_message(message: &AssistantMessage) -> Result<MessageParam, TranslateError> {
    let mut blocks = Vec::new();
    match &message.content {
        Some(AssistantContent::Text(text)) => {
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text: text.clone() });
            }
        }
        Some(AssistantContent::Parts(parts)) => {
            for part in parts {
                match part {
                    AssistantContentPart::Text { text } => {
                        blocks.push(ContentBlock::Text { text: text.clone() });
                    }
                    AssistantContentPart::Refusal { refusal } => {
                        blocks.push(ContentBlock::Text {
                            text: refusal.clone(),
                        });
                    }
                }
            }
        }
        None => {}
    }

    if let Some(tool_calls) = &message.tool_calls {
        for tool_call in tool_calls {
            let input: serde_json::Value = serde_json::from_str(&tool_call.function.arguments)
                .map_err(|err| {
                    TranslateError::InvalidRequest(format!(
                        "tool call arguments must be valid JSON: {err}"
                    ))
                })?;
            blocks.push(ContentBlock::ToolUse {
                id: tool_call.id.clone(),
                name: tool_call.function.name.clone(),
                input,
            });
        }
    }

    Ok(MessageParam {
        role: MessageRole::Assistant,
        content: MessageContent::Blocks(blocks),
    })
}

/// Tool results ride in a user-role message.
fn map_tool_message(message: &ToolMessage) -> MessageParam {
    MessageParam {
        role: MessageRole::User,
        content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
            tool_use_id: message.tool_call_id.clone(),
            content: Some(ToolResultContent::Text(message.content.joined())),
            is_error: None,
        }]),
    }
}

fn map_tools(request: &ChatCompletionRequest) -> Option<Vec<ToolParam>> {
    let tools = request.tools.as_ref()?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|ToolDefinition::Function { function }| ToolParam {
                name: function.name.clone(),
                description: function.description.clone(),
                input_schema: function
                    .parameters
                    .clone()
                    .unwrap_or(serde_json::json!({"type": "object"})),
            })
            .collect(),
    )
}

fn map_tool_choice(request: &ChatCompletionRequest) -> (Option<ToolChoice>, Option<bool>) {
    let disable_parallel = request.parallel_tool_calls.map(|parallel| !parallel);
    let choice = match &request.tool_choice {
        Some(ToolChoiceOption::Mode(ToolChoiceMode::Auto)) => Some(ToolChoice::Auto {
            disable_parallel_tool_use: None,
        }),
        Some(ToolChoiceOption::Mode(ToolChoiceMode::Required)) => Some(ToolChoice::Any {
            disable_parallel_tool_use: None,
        }),
        Some(ToolChoiceOption::Mode(ToolChoiceMode::None)) => Some(ToolChoice::None),
        Some(ToolChoiceOption::Named(named)) => Some(ToolChoice::Tool {
            name: named.function.name.clone(),
            disable_parallel_tool_use: None,
        }),
        None => None,
    };
    (choice, disable_parallel)
}

fn apply_parallel_override(
    choice: Option<ToolChoice>,
    disable_parallel: Option<bool>,
) -> Option<ToolChoice> {
    let Some(disable) = disable_parallel else {
        return choice;
    };
    // `parallel_tool_calls=false` needs a tool choice to hang the flag on.
    let choice = choice.unwrap_or(ToolChoice::Auto {
        disable_parallel_tool_use: None,
    });
    Some(match choice {
        ToolChoice::Auto { .. } => ToolChoice::Auto {
            disable_parallel_tool_use: Some(disable),
        },
        ToolChoice::Any { .. } => ToolChoice::Any {
            disable_parallel_tool_use: Some(disable),
        },
        ToolChoice::Tool { name, .. } => ToolChoice::Tool {
            name,
            disable_parallel_tool_use: Some(disable),
        },
        ToolChoice::None => ToolChoice::None,
    })
}
