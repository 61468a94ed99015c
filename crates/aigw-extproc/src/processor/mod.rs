//! Per-stream processors. The first RequestHeaders message picks a
//! processor kind from `:method` + `:path` (and the upstream-filter marker
//! header); each following phase message is answered with exactly one
//! response of the matching kind.

use std::collections::HashMap;

use aigw_envoy::{
    processing_response, BodyResponse, CommonResponse, HeadersResponse, HttpBody,
    ProcessingResponse,
};
use aigw_filterapi::UPSTREAM_FILTER_HEADER_KEY;

use crate::error::ProcessorError;
use crate::headers;
use crate::state::GatewayState;

pub mod chat;
pub mod embeddings;
pub mod models;
pub mod upstream;

use std::sync::Arc;

pub enum Processor {
    Chat(chat::ChatProcessor),
    Embeddings(embeddings::EmbeddingsProcessor),
    Models(models::ModelsProcessor),
    Upstream(upstream::UpstreamProcessor),
    Passthrough(PassthroughProcessor),
}

impl Processor {
    /// Chooses the processor kind for a stream from its request headers.
    pub fn dispatch(state: Arc<GatewayState>, request_headers: &HashMap<String, String>) -> Processor {
        let method = headers::header(request_headers, ":method").unwrap_or_default();
        let path = headers::header(request_headers, ":path")
            .unwrap_or_default()
            .split('?')
            .next()
            .unwrap_or_default();
        let is_upstream_filter = headers::header(request_headers, UPSTREAM_FILTER_HEADER_KEY)
            .is_some_and(|value| value == "true");

        match (method, path) {
            ("GET", "/v1/models") if is_upstream_filter => {
                Processor::Passthrough(PassthroughProcessor)
            }
            ("GET", "/v1/models") => Processor::Models(models::ModelsProcessor::new(state)),
            ("POST", "/v1/chat/completions") | ("POST", "/v1/embeddings") if is_upstream_filter => {
                Processor::Upstream(upstream::UpstreamProcessor::new(state))
            }
            ("POST", "/v1/chat/completions") => Processor::Chat(chat::ChatProcessor::new(state)),
            ("POST", "/v1/embeddings") => {
                Processor::Embeddings(embeddings::EmbeddingsProcessor::new(state))
            }
            _ => Processor::Passthrough(PassthroughProcessor),
        }
    }

    pub fn process_request_headers(
        &mut self,
        request_headers: HashMap<String, String>,
    ) -> Result<ProcessingResponse, ProcessorError> {
        match self {
            Processor::Chat(processor) => processor.process_request_headers(request_headers),
            Processor::Embeddings(processor) => processor.process_request_headers(request_headers),
            Processor::Models(processor) => processor.process_request_headers(),
            Processor::Upstream(processor) => processor.process_request_headers(request_headers),
            Processor::Passthrough(_) => Ok(request_headers_response(CommonResponse::default(), None)),
        }
    }

    pub fn process_request_body(
        &mut self,
        body: &HttpBody,
    ) -> Result<ProcessingResponse, ProcessorError> {
        match self {
            Processor::Chat(processor) => processor.process_request_body(body),
            Processor::Embeddings(processor) => processor.process_request_body(body),
            Processor::Models(_) => Err(ProcessorError::UnexpectedCall("ProcessRequestBody")),
            Processor::Upstream(processor) => processor.process_request_body(body),
            Processor::Passthrough(_) => Ok(request_body_response(CommonResponse::default(), None)),
        }
    }

    pub fn process_response_headers(
        &mut self,
        response_headers: HashMap<String, String>,
    ) -> Result<ProcessingResponse, ProcessorError> {
        match self {
            Processor::Chat(processor) => processor.process_response_headers(response_headers),
            Processor::Embeddings(processor) => processor.process_response_headers(response_headers),
            Processor::Models(_) => Err(ProcessorError::UnexpectedCall("ProcessResponseHeaders")),
            Processor::Upstream(_) => Ok(response_headers_response(CommonResponse::default())),
            Processor::Passthrough(_) => Ok(response_headers_response(CommonResponse::default())),
        }
    }

    pub fn process_response_body(
        &mut self,
        body: &HttpBody,
    ) -> Result<ProcessingResponse, ProcessorError> {
        match self {
            Processor::Chat(processor) => processor.process_response_body(body),
            Processor::Embeddings(processor) => processor.process_response_body(body),
            Processor::Models(_) => Err(ProcessorError::UnexpectedCall("ProcessResponseBody")),
            Processor::Upstream(_) => Ok(response_body_response(CommonResponse::default(), None)),
            Processor::Passthrough(_) => Ok(response_body_response(CommonResponse::default(), None)),
        }
    }
}

/// No-op processor for paths the gateway does not mediate.
pub struct PassthroughProcessor;

pub(crate) fn request_headers_response(
    response: CommonResponse,
    dynamic_metadata: Option<prost_types::Struct>,
) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(processing_response::Response::RequestHeaders(HeadersResponse {
            response: Some(response),
        })),
        dynamic_metadata,
    }
}

pub(crate) fn request_body_response(
    response: CommonResponse,
    dynamic_metadata: Option<prost_types::Struct>,
) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(processing_response::Response::RequestBody(BodyResponse {
            response: Some(response),
        })),
        dynamic_metadata,
    }
}

pub(crate) fn response_headers_response(response: CommonResponse) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(processing_response::Response::ResponseHeaders(HeadersResponse {
            response: Some(response),
        })),
        dynamic_metadata: None,
    }
}

pub(crate) fn response_body_response(
    response: CommonResponse,
    dynamic_metadata: Option<prost_types::Struct>,
) -> ProcessingResponse {
    ProcessingResponse {
        response: Some(processing_response::Response::ResponseBody(BodyResponse {
            response: Some(response),
        })),
        dynamic_metadata,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
    Terminal,
}

impl Phase {
    pub(crate) fn expect(
        self,
        expected: Phase,
        operation: &'static str,
    ) -> Result<(), ProcessorError> {
        if self == expected {
            Ok(())
        } else {
            Err(ProcessorError::UnexpectedCall(operation))
        }
    }
}
