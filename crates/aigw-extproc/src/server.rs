//! gRPC surface: one `Process` stream per proxied request. Messages are
//! handled serially within a spawned per-stream task; each phase message
//! gets exactly one response. Request-path failures answer with an
//! immediate response; phase-order violations tear the stream down.

use std::sync::Arc;

use aigw_envoy::external_processor_server::{ExternalProcessor, ExternalProcessorServer};
use aigw_envoy::{
    processing_request, processing_response, ProcessingRequest, ProcessingResponse,
    TrailersResponse,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::error::ProcessorError;
use crate::headers::decode_headers;
use crate::processor::Processor;
use crate::state::GatewayState;

pub struct ExternalProcessorService {
    state: Arc<GatewayState>,
}

impl ExternalProcessorService {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    pub fn into_server(self) -> ExternalProcessorServer<ExternalProcessorService> {
        ExternalProcessorServer::new(self)
    }
}

#[tonic::async_trait]
impl ExternalProcessor for ExternalProcessorService {
    type ProcessStream = ReceiverStream<Result<ProcessingResponse, Status>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel::<Result<ProcessingResponse, Status>>(16);
        let state = self.state.clone();

        tokio::spawn(async move {
            let mut processor: Option<Processor> = None;
            while let Some(message) = inbound.message().await.transpose() {
                let message = match message {
                    Ok(message) => message,
                    Err(status) => {
                        debug!(event = "stream_recv_error", error = %status);
                        break;
                    }
                };
                match handle_message(&state, &mut processor, message) {
                    Ok(Some(response)) => {
                        if tx.send(Ok(response)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) if err.closes_stream() => {
                        warn!(event = "stream_aborted", error = %err);
                        let _ = tx.send(Err(Status::internal(err.to_string()))).await;
                        break;
                    }
                    Err(err) => {
                        warn!(event = "request_failed", status = err.status(), error = %err);
                        if tx.send(Ok(err.to_immediate_response())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

fn handle_message(
    state: &Arc<GatewayState>,
    processor: &mut Option<Processor>,
    message: ProcessingRequest,
) -> Result<Option<ProcessingResponse>, ProcessorError> {
    use processing_request::Request as Phase;

    match message.request {
        Some(Phase::RequestHeaders(headers)) => {
            let decoded = decode_headers(headers.headers.as_ref());
            let mut chosen = Processor::dispatch(state.clone(), &decoded);
            let response = chosen.process_request_headers(decoded)?;
            *processor = Some(chosen);
            Ok(Some(response))
        }
        Some(Phase::RequestBody(body)) => processor
            .as_mut()
            .ok_or(ProcessorError::UnexpectedCall("ProcessRequestBody"))?
            .process_request_body(&body)
            .map(Some),
        Some(Phase::ResponseHeaders(headers)) => {
            let decoded = decode_headers(headers.headers.as_ref());
            processor
                .as_mut()
                .ok_or(ProcessorError::UnexpectedCall("ProcessResponseHeaders"))?
                .process_response_headers(decoded)
                .map(Some)
        }
        Some(Phase::ResponseBody(body)) => processor
            .as_mut()
            .ok_or(ProcessorError::UnexpectedCall("ProcessResponseBody"))?
            .process_response_body(&body)
            .map(Some),
        Some(Phase::RequestTrailers(_)) => Ok(Some(ProcessingResponse {
            response: Some(processing_response::Response::RequestTrailers(
                TrailersResponse::default(),
            )),
            dynamic_metadata: None,
        })),
        Some(Phase::ResponseTrailers(_)) => Ok(Some(ProcessingResponse {
            response: Some(processing_response::Response::ResponseTrailers(
                TrailersResponse::default(),
            )),
            dynamic_metadata: None,
        })),
        None => Ok(None),
    }
}
