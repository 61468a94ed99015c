//! Error model of the processor: every request-path failure maps onto the
//! canonical envelope and an HTTP status carried in an immediate response.

use aigw_envoy::{
    processing_response, GrpcStatus, HeaderMutation, HttpStatus, ImmediateResponse,
    ProcessingResponse,
};
use aigw_protocol::openai::error::ErrorEnvelope;
use aigw_transform::TranslateError;

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The request asks for something the selected backend cannot do.
    #[error("{0}")]
    UnsupportedMediaOrFeature(String),
    /// No route rule matched the request.
    #[error("no matching rule found for the request")]
    ModelNotFound,
    /// The canonical request body failed to decode or translate.
    #[error("{0}")]
    TranslateRequest(String),
    /// Credential injection failed.
    #[error("{0}")]
    BackendAuth(String),
    /// The backend response could not be parsed or mapped.
    #[error("{0}")]
    TranslateResponse(String),
    /// A phase arrived in a state that forbids it; closes the stream.
    #[error("unexpected method call: {0}")]
    UnexpectedCall(&'static str),
}

impl ProcessorError {
    pub fn status(&self) -> u16 {
        match self {
            ProcessorError::UnsupportedMediaOrFeature(_) | ProcessorError::TranslateRequest(_) => 400,
            ProcessorError::ModelNotFound => 404,
            ProcessorError::BackendAuth(_) => 500,
            ProcessorError::TranslateResponse(_) => 502,
            ProcessorError::UnexpectedCall(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorError::UnsupportedMediaOrFeature(_) | ProcessorError::TranslateRequest(_) => {
                "invalid_request_error"
            }
            ProcessorError::ModelNotFound => "model_not_found",
            ProcessorError::BackendAuth(_) => "backend_auth_error",
            ProcessorError::TranslateResponse(_) => "translation_error",
            ProcessorError::UnexpectedCall(_) => "internal_error",
        }
    }

    /// True when the stream must be torn down instead of answering with an
    /// immediate response.
    pub fn closes_stream(&self) -> bool {
        matches!(self, ProcessorError::UnexpectedCall(_))
    }

    pub fn to_immediate_response(&self) -> ProcessingResponse {
        let status = self.status();
        let body = ErrorEnvelope::new(self.kind(), self.to_string(), status).to_bytes();
        let mut headers = HeaderMutation::default();
        aigw_envoy::set_content_length(&mut headers, &body);
        aigw_envoy::set_header(&mut headers, "content-type", "application/json");
        ProcessingResponse {
            response: Some(processing_response::Response::ImmediateResponse(
                ImmediateResponse {
                    status: Some(HttpStatus {
                        code: i32::from(status),
                    }),
                    headers: Some(headers),
                    body,
                    grpc_status: Some(GrpcStatus { status: 0 }),
                    details: String::new(),
                },
            )),
            dynamic_metadata: None,
        }
    }
}

impl From<TranslateError> for ProcessorError {
    fn from(err: TranslateError) -> Self {
        match err {
            TranslateError::Unsupported(message) => ProcessorError::UnsupportedMediaOrFeature(message),
            TranslateError::InvalidRequest(message) => ProcessorError::TranslateRequest(message),
            TranslateError::InvalidResponse(message) => ProcessorError::TranslateResponse(message),
        }
    }
}

impl From<aigw_auth::AuthError> for ProcessorError {
    fn from(err: aigw_auth::AuthError) -> Self {
        ProcessorError::BackendAuth(err.to_string())
    }
}
