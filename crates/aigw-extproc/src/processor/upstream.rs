//! Per-cluster (upstream-filter) processor: the routing filter already
//! rewrote the body, so this side only injects backend credentials and
//! completes host/path once the outgoing bytes are known. It never
//! re-parses the body; SigV4 merely signs over it.

use std::collections::HashMap;
use std::sync::Arc;

use aigw_envoy::{CommonResponse, HeaderMutation, HttpBody, ProcessingResponse};
use aigw_filterapi::SELECTED_BACKEND_HEADER_KEY;

use crate::error::ProcessorError;
use crate::headers;
use crate::state::GatewayState;

use super::{request_body_response, request_headers_response, Phase};

pub struct UpstreamProcessor {
    state: Arc<GatewayState>,
    phase: Phase,
    request_headers: HashMap<String, String>,
    request_buffer: Vec<u8>,
}

impl UpstreamProcessor {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self {
            state,
            phase: Phase::RequestHeaders,
            request_headers: HashMap::new(),
            request_buffer: Vec::new(),
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
        self.phase = Phase::ResponseHeaders;

        let backend = headers::header(&self.request_headers, SELECTED_BACKEND_HEADER_KEY)
            .unwrap_or_default()
            .to_string();
        let mut header_mutation = HeaderMutation::default();
        if let Some(handler) = self.state.auth_handler(&backend) {
            handler.handle(&self.request_headers, &mut header_mutation, &self.request_buffer)?;
        }
        self.request_buffer = Vec::new();
        Ok(request_body_response(
            CommonResponse {
                header_mutation: Some(header_mutation),
                ..Default::default()
            },
            None,
        ))
    }
}
