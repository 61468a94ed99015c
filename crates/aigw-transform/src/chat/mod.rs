//! Chat-completions translators, one variant per backend schema.

use aigw_envoy::HeaderMutation;
use aigw_filterapi::{ApiSchemaName, VersionedApiSchema};
use aigw_protocol::openai::chat::ChatCompletionRequest;

use crate::{RequestTransform, ResponseHeaders, ResponseTransform, TranslateError};

pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod gemini;
pub mod openai;

pub enum ChatTranslator {
    OpenAi(openai::OpenAiChatTranslator),
    Azure(azure::AzureChatTranslator),
    Bedrock(bedrock::BedrockChatTranslator),
    Gemini(gemini::GeminiChatTranslator),
    Anthropic(anthropic::AnthropicChatTranslator),
}

impl ChatTranslator {
    pub fn new(schema: &VersionedApiSchema) -> Result<ChatTranslator, TranslateError> {
        match schema.name {
            ApiSchemaName::OpenAi => Ok(ChatTranslator::OpenAi(Default::default())),
            ApiSchemaName::AzureOpenAi => Ok(ChatTranslator::Azure(
                azure::AzureChatTranslator::new(schema.version.clone()),
            )),
            ApiSchemaName::AwsBedrock => Ok(ChatTranslator::Bedrock(Default::default())),
            ApiSchemaName::GcpGemini => Ok(ChatTranslator::Gemini(Default::default())),
            ApiSchemaName::GcpAnthropic => Ok(ChatTranslator::Anthropic(Default::default())),
        }
    }

    /// Rewrites the canonical request into the backend-native form.
    /// `force_body_mutation` re-emits an unchanged body, used when the
    /// proxy retries a request whose previous mutation was consumed.
    pub fn request_body(
        &mut self,
        raw: &[u8],
        request: &ChatCompletionRequest,
        force_body_mutation: bool,
    ) -> Result<RequestTransform, TranslateError> {
        match self {
            ChatTranslator::OpenAi(translator) => {
                translator.request_body(raw, request, force_body_mutation)
            }
            ChatTranslator::Azure(translator) => {
                translator.request_body(raw, request, force_body_mutation)
            }
            ChatTranslator::Bedrock(translator) => translator.request_body(request),
            ChatTranslator::Gemini(translator) => translator.request_body(request),
            ChatTranslator::Anthropic(translator) => translator.request_body(request),
        }
    }

    /// Rarely mutates anything; kept for schema parity with the other
    /// phases.
    pub fn response_headers(
        &mut self,
        _headers: &ResponseHeaders,
    ) -> Result<Option<HeaderMutation>, TranslateError> {
        Ok(None)
    }

    /// Consumes one response chunk. With `end_of_stream` the returned
    /// tallies are final.
    pub fn response_body(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<ResponseTransform, TranslateError> {
        match self {
            ChatTranslator::OpenAi(translator) => translator.response_body(chunk, end_of_stream),
            ChatTranslator::Azure(translator) => translator.response_body(chunk, end_of_stream),
            ChatTranslator::Bedrock(translator) => translator.response_body(chunk, end_of_stream),
            ChatTranslator::Gemini(translator) => translator.response_body(chunk, end_of_stream),
            ChatTranslator::Anthropic(translator) => translator.response_body(chunk, end_of_stream),
        }
    }

    /// Maps an upstream error onto the canonical envelope. Never fails.
    pub fn response_error(&mut self, status: u16, body: &[u8]) -> ResponseTransform {
        crate::translate_error_response(status, body)
    }
}

impl Default for ChatTranslator {
    fn default() -> Self {
        ChatTranslator::OpenAi(Default::default())
    }
}
