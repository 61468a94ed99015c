//! Canonical request → Bedrock Converse request.

use aigw_protocol::bedrock::{
    AnyToolChoice, AutoToolChoice, ContentBlock, ConversationRole, ConverseRequest, ImageBlock,
    ImageSource, InferenceConfiguration, Message, SpecificToolChoice, SystemContentBlock, Tool,
    ToolChoice, ToolConfiguration, ToolInputSchema, ToolResultBlock, ToolResultContentBlock,
    ToolSpecification, ToolUseBlock,
};
use aigw_protocol::datauri;
use aigw_protocol::openai::chat::{
    AssistantContent, AssistantContentPart, AssistantMessage, ChatCompletionMessage,
    ChatCompletionRequest, ToolCall, ToolChoiceMode, ToolChoiceOption, ToolDefinition, ToolMessage,
    UserContent, UserContentPart, UserMessage,
};

use crate::TranslateError;

use base64::Engine;

pub fn transform_request(request: &ChatCompletionRequest) -> Result<ConverseRequest, TranslateError> {
    let mut system = Vec::new();
    let mut messages = Vec::new();

    for message in &request.messages {
        match message {
            ChatCompletionMessage::System(msg) => {
                system.push(SystemContentBlock::Text(msg.content.joined()));
            }
            ChatCompletionMessage::Developer(msg) => {
                system.push(SystemContentBlock::Text(msg.content.joined()));
            }
            ChatCompletionMessage::User(msg) => messages.push(map_user_message(msg)?),
            ChatCompletionMessage::Assistant(msg) => messages.push(map_assistant_message(msg)?),
            ChatCompletionMessage::Tool(msg) => messages.push(map_tool_message(msg)),
        }
    }

    Ok(ConverseRequest {
        system: (!system.is_empty()).then_some(system),
        messages,
        inference_config: map_inference_config(request),
        tool_config: map_tool_config(request)?,
    })
}

fn map_user_message(message: &UserMessage) -> Result<Message, TranslateError> {
    let content = match &message.content {
        UserContent::Text(text) => vec![ContentBlock::Text(text.clone())],
        UserContent::Parts(parts) => {
            let mut blocks = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    UserContentPart::Text { text } => blocks.push(ContentBlock::Text(text.clone())),
                    UserContentPart::ImageUrl { image_url } => {
                        blocks.push(map_image(&image_url.url)?);
                    }
                    UserContentPart::InputAudio { .. } => {
                        return Err(TranslateError::Unsupported(
                            "audio content not supported yet".to_string(),
                        ));
                    }
                }
            }
            blocks
        }
    };
    Ok(Message {
        role: ConversationRole::User,
        content,
    })
}

fn map_image(url: &str) -> Result<ContentBlock, TranslateError> {
    if !datauri::is_data_uri(url) {
        return Err(TranslateError::Unsupported(
            "Bedrock images must be inline data URIs".to_string(),
        ));
    }
    let (media_type, bytes) = datauri::parse_data_uri(url)
        .map_err(|err| TranslateError::InvalidRequest(format!("failed to parse image URL: {err}")))?;
    let format = media_type
        .strip_prefix("image/")
        .ok_or_else(|| TranslateError::InvalidRequest(format!("invalid media_type for image '{media_type}'")))?;
    Ok(ContentBlock::Image(ImageBlock {
        format: format.to_string(),
        source: ImageSource::Bytes(base64::engine::general_purpose::STANDARD.encode(bytes)),
    }))
}

fn map_assistant_message(message: &AssistantMessage) -> Result<Message, TranslateError> {
    let mut blocks = Vec::new();
    match &message.content {
        Some(AssistantContent::Text(text)) => {
            if !text.is_empty() {
                blocks.push(ContentBlock::Text(text.clone()));
            }
        }
        Some(AssistantContent::Parts(parts)) => {
            for part in parts {
                match part {
                    AssistantContentPart::Text { text } => {
                        blocks.push(ContentBlock::Text(text.clone()));
                    }
                    AssistantContentPart::Refusal { refusal } => {
                        blocks.push(ContentBlock::Text(refusal.clone()));
                    }
                }
            }
        }
        None => {}
    }
    if let Some(tool_calls) = &message.tool_calls {
        for tool_call in tool_calls {
            blocks.push(map_tool_call(tool_call)?);
        }
    }
    Ok(Message {
        role: ConversationRole::Assistant,
        content: blocks,
    })
}

fn map_tool_call(tool_call: &ToolCall) -> Result<ContentBlock, TranslateError> {
    let input: serde_json::Value = serde_json::from_str(&tool_call.function.arguments)
        .map_err(|err| TranslateError::InvalidRequest(format!("tool call arguments must be valid JSON: {err}")))?;
    Ok(ContentBlock::ToolUse(ToolUseBlock {
        tool_use_id: tool_call.id.clone(),
        name: tool_call.function.name.clone(),
        input,
    }))
}

/// Tool results ride in a user-role message on Bedrock.
fn map_tool_message(message: &ToolMessage) -> Message {
    Message {
        role: ConversationRole::User,
        content: vec![ContentBlock::ToolResult(ToolResultBlock {
            tool_use_id: message.tool_call_id.clone(),
            content: vec![ToolResultContentBlock::Text(message.content.joined())],
            status: None,
        })],
    }
}

fn map_inference_config(request: &ChatCompletionRequest) -> Option<InferenceConfiguration> {
    let stop_sequences = request
        .stop
        .clone()
        .map(|stop| stop.into_sequences())
        .filter(|sequences| !sequences.is_empty());
    let config = InferenceConfiguration {
        max_tokens: request.output_token_cap(),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences,
    };
    (config != InferenceConfiguration::default()).then_some(config)
}

fn map_tool_config(request: &ChatCompletionRequest) -> Result<Option<ToolConfiguration>, TranslateError> {
    let Some(tools) = &request.tools else {
        return Ok(None);
    };
    if tools.is_empty() {
        return Ok(None);
    }
    let tools = tools
        .iter()
        .map(|ToolDefinition::Function { function }| {
            Tool::ToolSpec(ToolSpecification {
                name: function.name.clone(),
                description: function.description.clone(),
                input_schema: ToolInputSchema::Json(
                    function.parameters.clone().unwrap_or(serde_json::json!({})),
                ),
            })
        })
        .collect();

    let tool_choice = match &request.tool_choice {
        Some(ToolChoiceOption::Mode(ToolChoiceMode::Auto)) => Some(ToolChoice::Auto(AutoToolChoice {})),
        Some(ToolChoiceOption::Mode(ToolChoiceMode::Required)) => Some(ToolChoice::Any(AnyToolChoice {})),
        // Converse has no explicit "none"; leaving the choice unset keeps
        // tool use model-discretionary.
        Some(ToolChoiceOption::Mode(ToolChoiceMode::None)) | None => None,
        Some(ToolChoiceOption::Named(named)) => Some(ToolChoice::Tool(SpecificToolChoice {
            name: named.function.name.clone(),
        })),
    };

    Ok(Some(ToolConfiguration { tools, tool_choice }))
}
