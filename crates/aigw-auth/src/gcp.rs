use aigw_envoy::{set_header, HeaderMutation};
use aigw_filterapi::GcpAuth;

use crate::{read_credential_entry, AuthError, RequestHeaders};

/// Key under which rotators store the access token in the credential file.
pub const CLIENT_SECRET_KEY: &str = "client-secret";

#[derive(Debug)]
pub struct GcpHandler {
    config: GcpAuth,
}

impl GcpHandler {
    pub fn new(config: GcpAuth) -> Self {
        Self { config }
    }

    /// Injects the bearer token and completes the Vertex URL: the
    /// translator leaves a `publishers/<pub>/models/<model>:<method>`
    /// suffix in `:path`, which is expanded to the regional endpoint here.
    pub fn handle(
        &self,
        request_headers: &RequestHeaders,
        header_mutation: &mut HeaderMutation,
    ) -> Result<(), AuthError> {
        let token = read_credential_entry(&self.config.credential_file_name, CLIENT_SECRET_KEY)?;
        set_header(header_mutation, "authorization", format!("Bearer {token}"));

        let suffix = request_headers
            .get(":path")
            .map(|path| path.trim_start_matches('/'))
            .unwrap_or_default();
        let region = &self.config.region;
        let project = &self.config.project_name;
        set_header(
            header_mutation,
            ":path",
            format!("/v1/projects/{project}/locations/{region}/{suffix}"),
        );
        set_header(
            header_mutation,
            ":authority",
            format!("{region}-aiplatform.googleapis.com"),
        );
        Ok(())
    }
}
