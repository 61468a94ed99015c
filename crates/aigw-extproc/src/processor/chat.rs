//! Router-side chat-completions processor: parses the canonical body,
//! routes it, rewrites it into the backend format, and translates the
//! response phases back, accounting token usage along the way.
//!
//! Phase order: HeadersRequest → BodyRequest → HeadersResponse →
//! BodyResponse* → Terminal. Response bodies may repeat while the backend
//! streams.

use std::collections::HashMap;
use std::sync::Arc;

use aigw_envoy::{CommonResponse, HttpBody, ProcessingResponse};
use aigw_filterapi::SELECTED_BACKEND_HEADER_KEY;
use aigw_transform::{ChatTranslator, TokenUsage};
use tracing::info;

use crate::error::ProcessorError;
use crate::headers;
use crate::metadata::build_dynamic_metadata;
use crate::router::select_route;
use crate::state::GatewayState;

use super::{
    request_body_response, request_headers_response, response_body_response,
    response_headers_response, Phase,
};

pub struct ChatProcessor {
    state: Arc<GatewayState>,
    phase: Phase,
    request_headers: HashMap<String, String>,
    request_buffer: Vec<u8>,
    response_buffer: Vec<u8>,
    translator: Option<ChatTranslator>,
    model: String,
    rule_name: String,
    backend_name: String,
    usage: TokenUsage,
    response_status: u16,
    upstream_error: bool,
}

impl ChatProcessor {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self {
            state,
            phase: Phase::RequestHeaders,
            request_headers: HashMap::new(),
            request_buffer: Vec::new(),
            response_buffer: Vec::new(),
            translator: None,
            model: String::new(),
            rule_name: String::new(),
            backend_name: String::new(),
            usage: TokenUsage::default(),
            response_status: 200,
            upstream_error: false,
        }
    }

    pub fn process_request_headers(
        &mut self,
        request_headers: HashMap<String, String>,
    ) -> Result<ProcessingResponse, ProcessorError> {
        self.phase.expect(Phase::RequestHeaders, "ProcessRequestHeaders")?;
        self.request_headers = request_headers;
        self.phase = Phase::RequestBody;
        Ok(request_headers_response(CommonResponse::default(), None))
    }

    pub fn process_request_body(
        &mut self,
        body: &HttpBody,
    ) -> Result<ProcessingResponse, ProcessorError> {
        self.phase.expect(Phase::RequestBody, "ProcessRequestBody")?;
        self.request_buffer.extend_from_slice(&body.body);
        if !body.end_of_stream {
            return Ok(request_body_response(CommonResponse::default(), None));
        }

        let request = aigw_transform::decode_chat_request(&self.request_buffer)?;
        self.model = request.model.clone();

        let decision = select_route(&self.state.config, &self.request_headers, &self.model)?;
        self.rule_name = decision.rule_name;
        self.backend_name = decision.backend.name.clone();

        let mut translator = aigw_transform::chat_translator_for(&decision.backend.schema)?;
        let mut transform = translator.request_body(&self.request_buffer, &request, false)?;
        self.translator = Some(translator);

        let config = &self.state.config;
        aigw_envoy::set_header(
            &mut transform.header_mutation,
            &config.model_name_header_key,
            &self.model,
        );
        aigw_envoy::set_header(
            &mut transform.header_mutation,
            &config.selected_route_header_key,
            &self.rule_name,
        );
        aigw_envoy::set_header(
            &mut transform.header_mutation,
            SELECTED_BACKEND_HEADER_KEY,
            &self.backend_name,
        );

        info!(
            event = "route_selected",
            model = %self.model,
            rule = %self.rule_name,
            backend = %self.backend_name,
            stream = request.is_streaming(),
        );

        self.phase = Phase::ResponseHeaders;
        self.request_buffer = Vec::new();
        Ok(request_body_response(
            CommonResponse {
                header_mutation: Some(transform.header_mutation),
                body_mutation: transform.body_mutation,
                // The routing headers must re-enter route selection.
                clear_route_cache: true,
                ..Default::default()
            },
            None,
        ))
    }

    pub fn process_response_headers(
        &mut self,
        response_headers: HashMap<String, String>,
    ) -> Result<ProcessingResponse, ProcessorError> {
        self.phase.expect(Phase::ResponseHeaders, "ProcessResponseHeaders")?;
        self.response_status = headers::response_status(&response_headers);
        self.upstream_error = self.response_status >= 400;
        let header_mutation = match self.translator.as_mut() {
            Some(translator) => translator.response_headers(&response_headers)?,
            None => None,
        };
        self.phase = Phase::ResponseBody;
        Ok(response_headers_response(CommonResponse {
            header_mutation,
            ..Default::default()
        }))
    }

    pub fn process_response_body(
        &mut self,
        body: &HttpBody,
    ) -> Result<ProcessingResponse, ProcessorError> {
        self.phase.expect(Phase::ResponseBody, "ProcessResponseBody")?;
        let translator = self
            .translator
            .as_mut()
            .ok_or(ProcessorError::UnexpectedCall("ProcessResponseBody"))?;

        let transform = if self.upstream_error {
            self.response_buffer.extend_from_slice(&body.body);
            if !body.end_of_stream {
                return Ok(response_body_response(CommonResponse::default(), None));
            }
            translator.response_error(self.response_status, &self.response_buffer)
        } else {
            translator.response_body(&body.body, body.end_of_stream)?
        };
        self.usage.accumulate(transform.usage);

        let mut dynamic_metadata = None;
        if body.end_of_stream {
            self.phase = Phase::Terminal;
            if !self.upstream_error {
                dynamic_metadata = build_dynamic_metadata(
                    &self.state.config,
                    &self.usage,
                    &self.model,
                    &self.backend_name,
                );
            }
            info!(
                event = "stream_complete",
                model = %self.model,
                backend = %self.backend_name,
                status = self.response_status,
                input_tokens = self.usage.input_tokens,
                output_tokens = self.usage.output_tokens,
                total_tokens = self.usage.total_tokens,
            );
        }

        Ok(response_body_response(
            CommonResponse {
                header_mutation: Some(transform.header_mutation),
                body_mutation: transform.body_mutation,
                ..Default::default()
            },
            dynamic_metadata,
        ))
    }
}
