//! Backend credential injection.
//!
//! One handler per auth kind; all expose `handle(request_headers,
//! header_mutation, body)`. Secret files are re-read on every call so
//! external rotation is picked up without coordination; rotators replace
//! files with atomic renames and readers tolerate the pre-rotation window.

use std::collections::HashMap;

use aigw_envoy::HeaderMutation;
use aigw_filterapi::BackendAuth;

mod apikey;
mod aws;
mod azure;
mod gcp;
pub mod rotator;

pub use apikey::ApiKeyHandler;
pub use aws::AwsHandler;
pub use azure::AzureHandler;
pub use gcp::GcpHandler;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to read credential file '{path}': {source}")]
    CredentialFile {
        path: String,
        source: std::io::Error,
    },
    #[error("credential file '{0}' is missing the {1} entry")]
    MissingCredential(String, &'static str),
    #[error("backend auth config declares no auth kind")]
    EmptyAuthConfig,
}

/// Lower-cased request headers as decoded from the ext_proc header map.
pub type RequestHeaders = HashMap<String, String>;

#[derive(Debug)]
pub enum Handler {
    ApiKey(ApiKeyHandler),
    Aws(AwsHandler),
    Azure(AzureHandler),
    Gcp(GcpHandler),
}

impl Handler {
    pub fn new(auth: &BackendAuth) -> Result<Handler, AuthError> {
        if let Some(api_key) = &auth.api_key {
            Ok(Handler::ApiKey(ApiKeyHandler::new(api_key.clone())))
        } else if let Some(aws) = &auth.aws {
            Ok(Handler::Aws(AwsHandler::new(aws.clone())))
        } else if let Some(azure) = &auth.azure {
            Ok(Handler::Azure(AzureHandler::new(azure.clone())))
        } else if let Some(gcp) = &auth.gcp {
            Ok(Handler::Gcp(GcpHandler::new(gcp.clone())))
        } else {
            Err(AuthError::EmptyAuthConfig)
        }
    }

    /// Injects credentials into the outgoing request. `body` is the bytes
    /// the proxy will forward upstream (post-translation); only SigV4
    /// signs over it.
    pub fn handle(
        &self,
        request_headers: &RequestHeaders,
        header_mutation: &mut HeaderMutation,
        body: &[u8],
    ) -> Result<(), AuthError> {
        match self {
            Handler::ApiKey(handler) => handler.handle(header_mutation),
            Handler::Aws(handler) => handler.handle(request_headers, header_mutation, body),
            Handler::Azure(handler) => handler.handle(header_mutation),
            Handler::Gcp(handler) => handler.handle(request_headers, header_mutation),
        }
    }
}

fn read_trimmed(path: &str) -> Result<String, AuthError> {
    let raw = std::fs::read_to_string(path).map_err(|source| AuthError::CredentialFile {
        path: path.to_string(),
        source,
    })?;
    Ok(raw.trim().to_string())
}

/// Parses `key: value` lines, the format rotators write.
fn read_credential_entry(path: &str, key: &'static str) -> Result<String, AuthError> {
    let raw = std::fs::read_to_string(path).map_err(|source| AuthError::CredentialFile {
        path: path.to_string(),
        source,
    })?;
    for line in raw.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim() == key {
                return Ok(value.trim().to_string());
            }
        }
    }
    Err(AuthError::MissingCredential(path.to_string(), key))
}
