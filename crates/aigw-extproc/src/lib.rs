//! The external-processor data plane: per-stream processors driving the
//! ext_proc protocol, the model-based router, dynamic-metadata emission,
//! and the gRPC service wiring.

pub mod error;
pub mod headers;
pub mod metadata;
pub mod processor;
pub mod router;
pub mod server;
pub mod state;

pub use error::ProcessorError;
pub use processor::Processor;
pub use server::ExternalProcessorService;
pub use state::GatewayState;
