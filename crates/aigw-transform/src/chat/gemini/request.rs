//! Canonical request → Gemini `generateContent` request.

use std::collections::HashMap;

use aigw_protocol::datauri;
use aigw_protocol::gemini::{
    Content, ContentRole, FunctionCallingConfig, FunctionCallingMode, FunctionDeclaration,
    GenerateContentRequest, GenerationConfig, Part, Tool, ToolConfig,
};
use aigw_protocol::openai::chat::{
    AssistantContent, AssistantContentPart, AssistantMessage, ChatCompletionMessage,
    ChatCompletionRequest, TextContent, ToolChoiceMode, ToolChoiceOption, ToolDefinition,
    ToolMessage, UserContent, UserContentPart, UserMessage,
};

use crate::TranslateError;

use base64::Engine;

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

pub fn transform_request(
    request: &ChatCompletionRequest,
) -> Result<GenerateContentRequest, TranslateError> {
    let (contents, system_instruction) = to_contents(&request.messages)?;
    Ok(GenerateContentRequest {
        contents,
        tools: map_tools(request),
        tool_config: map_tool_config(request),
        generation_config: map_generation_config(request),
        system_instruction,
    })
}

/// Messages become Gemini contents. User and tool parts accumulate until an
/// assistant message flushes them: consecutive tool results for parallel
/// calls must land in a single user content, otherwise Gemini rejects the
/// turn for having fewer function responses than function calls.
fn to_contents(
    messages: &[ChatCompletionMessage],
) -> Result<(Vec<Content>, Option<Content>), TranslateError> {
    let mut contents = Vec::new();
    let mut system_parts: Vec<Part> = Vec::new();
    let mut pending_parts: Vec<Part> = Vec::new();
    let mut known_tool_calls: HashMap<String, String> = HashMap::new();

    for message in messages {
        match message {
            ChatCompletionMessage::System(msg) => {
                system_parts.extend(text_parts(&msg.content));
            }
            ChatCompletionMessage::Developer(msg) => {
                system_parts.extend(text_parts(&msg.content));
            }
            ChatCompletionMessage::User(msg) => {
                pending_parts.extend(user_parts(msg)?);
            }
            ChatCompletionMessage::Tool(msg) => {
                pending_parts.push(tool_part(msg, &known_tool_calls));
            }
            ChatCompletionMessage::Assistant(msg) => {
                if !pending_parts.is_empty() {
                    contents.push(Content {
                        role: Some(ContentRole::User),
                        parts: std::mem::take(&mut pending_parts),
                    });
                }
                let (parts, tool_calls) = assistant_parts(msg)?;
                known_tool_calls.extend(tool_calls);
                contents.push(Content {
                    role: Some(ContentRole::Model),
                    parts,
                });
            }
        }
    }

    if !pending_parts.is_empty() {
        contents.push(Content {
            role: Some(ContentRole::User),
            parts: pending_parts,
        });
    }

    let system_instruction = (!system_parts.is_empty()).then_some(Content {
        role: Some(ContentRole::User),
        parts: system_parts,
    });
    Ok((contents, system_instruction))
}

fn text_parts(content: &TextContent) -> Vec<Part> {
    let text = content.joined();
    if text.is_empty() {
        Vec::new()
    } else {
        vec![Part::text(text)]
    }
}

fn user_parts(message: &UserMessage) -> Result<Vec<Part>, TranslateError> {
    match &message.content {
        UserContent::Text(text) => Ok(if text.is_empty() {
            Vec::new()
        } else {
            vec![Part::text(text.clone())]
        }),
        UserContent::Parts(parts) => {
            let mut out = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    UserContentPart::Text { text } => {
                        if !text.is_empty() {
                            out.push(Part::text(text.clone()));
                        }
                    }
                    UserContentPart::ImageUrl { image_url } => {
                        if image_url.url.is_empty() {
                            continue;
                        }
                        out.push(image_part(&image_url.url)?);
                    }
                    UserContentPart::InputAudio { .. } => {
                        return Err(TranslateError::Unsupported(
                            "audio content not supported yet".to_string(),
                        ));
                    }
                }
            }
            Ok(out)
        }
    }
}

fn image_part(url: &str) -> Result<Part, TranslateError> {
    if datauri::is_data_uri(url) {
        let (mime_type, bytes) = datauri::parse_data_uri(url).map_err(|err| {
            TranslateError::InvalidRequest(format!("failed to parse data URI: {err}"))
        })?;
        return Ok(Part::inline_data(
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(bytes),
        ));
    }
    Ok(Part::file_data(mime_from_extension(url), url))
}

fn mime_from_extension(url: &str) -> &'static str {
    let lowered = url.to_ascii_lowercase();
    let path = lowered.split(['?', '#']).next().unwrap_or_default();
    match path.rsplit('.').next() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => DEFAULT_IMAGE_MIME,
    }
}

fn tool_part(message: &ToolMessage, known_tool_calls: &HashMap<String, String>) -> Part {
    let name = known_tool_calls
        .get(&message.tool_call_id)
        .cloned()
        .unwrap_or_default();
    Part::function_response(
        name,
        serde_json::json!({"output": message.content.joined()}),
    )
}

fn assistant_parts(
    message: &AssistantMessage,
) -> Result<(Vec<Part>, HashMap<String, String>), TranslateError> {
    let mut parts = Vec::new();
    let mut known_tool_calls = HashMap::new();

    if let Some(tool_calls) = &message.tool_calls {
        for tool_call in tool_calls {
            known_tool_calls.insert(tool_call.id.clone(), tool_call.function.name.clone());
            let args: serde_json::Value = serde_json::from_str(&tool_call.function.arguments)
                .map_err(|err| {
                    TranslateError::InvalidRequest(format!(
                        "function arguments should be valid json string: {err}"
                    ))
                })?;
            parts.push(Part::function_call(tool_call.function.name.clone(), args));
        }
    }

    match &message.content {
        Some(AssistantContent::Text(text)) => {
            if !text.is_empty() {
                parts.push(Part::text(text.clone()));
            }
        }
        Some(AssistantContent::Parts(content_parts)) => {
            for part in content_parts {
                match part {
                    AssistantContentPart::Text { text } => {
                        if !text.is_empty() {
                            parts.push(Part::text(text.clone()));
                        }
                    }
                    // Refusal text has no Gemini counterpart.
                    AssistantContentPart::Refusal { .. } => {}
                }
            }
        }
        None => {}
    }

    Ok((parts, known_tool_calls))
}

fn map_generation_config(request: &ChatCompletionRequest) -> Option<GenerationConfig> {
    let stop_sequences = request
        .stop
        .clone()
        .map(|stop| stop.into_sequences())
        .filter(|sequences| !sequences.is_empty());
    let config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.output_token_cap(),
        candidate_count: request.n,
        seed: request.seed,
        presence_penalty: request.presence_penalty,
        frequency_penalty: request.frequency_penalty,
        stop_sequences,
        response_logprobs: request.logprobs,
        logprobs: request.top_logprobs.map(i64::from),
    };
    (config != GenerationConfig::default()).then_some(config)
}

fn map_tools(request: &ChatCompletionRequest) -> Option<Vec<Tool>> {
    let tools = request.tools.as_ref()?;
    if tools.is_empty() {
        return None;
    }
    let declarations = tools
        .iter()
        .map(|ToolDefinition::Function { function }| FunctionDeclaration {
            name: function.name.clone(),
            description: function.description.clone(),
            parameters: function.parameters.clone(),
        })
        .collect();
    Some(vec![Tool {
        function_declarations: Some(declarations),
    }])
}

fn map_tool_config(request: &ChatCompletionRequest) -> Option<ToolConfig> {
    let mode = match request.tool_choice.as_ref()? {
        ToolChoiceOption::Mode(ToolChoiceMode::Auto) => FunctionCallingMode::Auto,
        ToolChoiceOption::Mode(ToolChoiceMode::Required) => FunctionCallingMode::Any,
        ToolChoiceOption::Mode(ToolChoiceMode::None) => FunctionCallingMode::None,
        ToolChoiceOption::Named(named) => {
            return Some(ToolConfig {
                function_calling_config: Some(FunctionCallingConfig {
                    mode: Some(FunctionCallingMode::Any),
                    allowed_function_names: Some(vec![named.function.name.clone()]),
                }),
            });
        }
    };
    Some(ToolConfig {
        function_calling_config: Some(FunctionCallingConfig {
            mode: Some(mode),
            allowed_function_names: None,
        }),
    })
}
