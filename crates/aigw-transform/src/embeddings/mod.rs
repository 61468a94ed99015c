//! Embeddings translators. OpenAI is a passthrough with usage scraping;
//! Bedrock is passthrough-plus-content-length with the path rewritten to
//! the invoke endpoint (richer mapping is not yet established upstream).

use aigw_filterapi::{ApiSchemaName, VersionedApiSchema};
use aigw_protocol::openai::embeddings::{EmbeddingsRequest, EmbeddingsResponse};

use crate::{
    unsupported_schema, RequestTransform, ResponseTransform, TokenUsage, TranslateError,
};

pub enum EmbeddingsTranslator {
    OpenAi(OpenAiEmbeddingsTranslator),
    Bedrock(BedrockEmbeddingsTranslator),
}

impl EmbeddingsTranslator {
    pub fn new(schema: &VersionedApiSchema) -> Result<EmbeddingsTranslator, TranslateError> {
        match schema.name {
            ApiSchemaName::OpenAi => Ok(EmbeddingsTranslator::OpenAi(Default::default())),
            ApiSchemaName::AwsBedrock => Ok(EmbeddingsTranslator::Bedrock(Default::default())),
            other => Err(unsupported_schema("embeddings", other)),
        }
    }

    pub fn request_body(
        &mut self,
        raw: &[u8],
        request: &EmbeddingsRequest,
        force_body_mutation: bool,
    ) -> Result<RequestTransform, TranslateError> {
        match self {
            EmbeddingsTranslator::OpenAi(translator) => {
                translator.request_body(raw, force_body_mutation)
            }
            EmbeddingsTranslator::Bedrock(translator) => translator.request_body(raw, request),
        }
    }

    pub fn response_body(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<ResponseTransform, TranslateError> {
        match self {
            EmbeddingsTranslator::OpenAi(translator) => {
                translator.response_body(chunk, end_of_stream)
            }
            EmbeddingsTranslator::Bedrock(_) => Ok(ResponseTransform::default()),
        }
    }

    pub fn response_error(&mut self, status: u16, body: &[u8]) -> ResponseTransform {
        crate::translate_error_response(status, body)
    }
}

#[derive(Default)]
pub struct OpenAiEmbeddingsTranslator {
    buffered: Vec<u8>,
}

impl OpenAiEmbeddingsTranslator {
    fn request_body(
        &mut self,
        raw: &[u8],
        force_body_mutation: bool,
    ) -> Result<RequestTransform, TranslateError> {
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

    fn response_body(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<ResponseTransform, TranslateError> {
        self.buffered.extend_from_slice(chunk);
        if !end_of_stream {
            return Ok(ResponseTransform::default());
        }
        let response: EmbeddingsResponse = serde_json::from_slice(&self.buffered)
            .map_err(|err| TranslateError::InvalidResponse(format!("invalid embeddings response: {err}")))?;
        Ok(ResponseTransform {
            usage: TokenUsage {
                input_tokens: response.usage.prompt_tokens,
                output_tokens: 0,
                total_tokens: response.usage.total_tokens,
            },
            ..Default::default()
        })
    }
}

#[derive(Default)]
pub struct BedrockEmbeddingsTranslator;

impl BedrockEmbeddingsTranslator {
    fn request_body(
        &mut self,
        raw: &[u8],
        request: &EmbeddingsRequest,
    ) -> Result<RequestTransform, TranslateError> {
        let path = format!("/model/{}/invoke", request.model);
        let (header_mutation, body_mutation) = aigw_envoy::request_mutations(&path, raw.to_vec());
        Ok(RequestTransform {
            header_mutation,
            body_mutation: Some(body_mutation),
        })
    }
}
