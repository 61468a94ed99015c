//! `GET /v1/models`: answers immediately from the declared models in the
//! configuration. Later phases are illegal and close the stream.

use std::sync::Arc;

use aigw_envoy::{
    processing_response, GrpcStatus, HeaderMutation, HttpStatus, ImmediateResponse,
    ProcessingResponse,
};
use aigw_protocol::openai::models::{Model, ModelList, ModelListObjectType, ModelObjectType};
use tracing::info;

use crate::error::ProcessorError;
use crate::state::GatewayState;

pub struct ModelsProcessor {
    models: ModelList,
}

impl ModelsProcessor {
    pub fn new(state: Arc<GatewayState>) -> Self {
        let data = state
            .config
            .models
            .iter()
            .map(|declared| Model {
                id: declared.name.clone(),
                object: ModelObjectType::Model,
                created: declared
                    .created_at
                    .map(|created_at| created_at.unix_timestamp())
                    .unwrap_or_default(),
                owned_by: declared.owned_by.clone(),
            })
            .collect();
        Self {
            models: ModelList {
                object: ModelListObjectType::List,
                data,
            },
        }
    }

    pub fn process_request_headers(&mut self) -> Result<ProcessingResponse, ProcessorError> {
        info!(event = "models_list_served", count = self.models.data.len());
        let body = serde_json::to_vec(&self.models)
            .map_err(|err| ProcessorError::TranslateResponse(format!("encoding model list: {err}")))?;

        let mut headers = HeaderMutation::default();
        aigw_envoy::set_content_length(&mut headers, &body);
        aigw_envoy::set_header(&mut headers, "content-type", "application/json");

        Ok(ProcessingResponse {
            response: Some(processing_response::Response::ImmediateResponse(
                ImmediateResponse {
                    status: Some(HttpStatus { code: 200 }),
                    headers: Some(headers),
                    body,
                    grpc_status: Some(GrpcStatus { status: 0 }),
                    details: String::new(),
                },
            )),
            dynamic_metadata: None,
        })
    }
}
