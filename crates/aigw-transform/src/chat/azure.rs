//! Azure OpenAI: the body stays in the canonical schema; only the path is
//! rewritten onto the deployment endpoint. Responses behave exactly like
//! the OpenAI passthrough.

use aigw_protocol::openai::chat::ChatCompletionRequest;

use crate::{RequestTransform, ResponseTransform, TranslateError};

use super::openai::OpenAiChatTranslator;

/// Pinned when the backend schema carries no version.
const DEFAULT_API_VERSION: &str = "2025-01-01-preview";

#[derive(Default)]
pub struct AzureChatTranslator {
    api_version: Option<String>,
    passthrough: OpenAiChatTranslator,
}

impl AzureChatTranslator {
    pub fn new(api_version: Option<String>) -> Self {
        Self {
            api_version,
            passthrough: OpenAiChatTranslator::default(),
        }
    }

    pub fn request_body(
        &mut self,
        raw: &[u8],
        request: &ChatCompletionRequest,
        force_body_mutation: bool,
    ) -> Result<RequestTransform, TranslateError> {
        let mut transform = self
            .passthrough
            .request_body(raw, request, force_body_mutation)?;
        let api_version = self.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION);
        aigw_envoy::set_header(
            &mut transform.header_mutation,
            ":path",
            format!(
                "/openai/deployments/{}/chat/completions?api-version={api_version}",
                request.model
            ),
        );
        Ok(transform)
    }

    pub fn response_body(
        &mut self,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<ResponseTransform, TranslateError> {
        self.passthrough.response_body(chunk, end_of_stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_path_to_deployment() {
        let request: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();
        let raw = serde_json::to_vec(&request).unwrap();

        let mut translator = AzureChatTranslator::new(Some("2024-06-01".to_string()));
        let transform = translator.request_body(&raw, &request, false).unwrap();
        let path = transform
            .header_mutation
            .set_headers
            .iter()
            .map(|option| option.header.as_ref().unwrap())
            .find(|header| header.key == ":path")
            .unwrap();
        assert_eq!(
            path.raw_value,
            b"/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
        );
        assert!(transform.body_mutation.is_none());
    }
}
