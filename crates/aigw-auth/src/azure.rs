use aigw_envoy::{set_header, HeaderMutation};
use aigw_filterapi::AzureAuth;

use crate::{read_trimmed, AuthError};

#[derive(Debug)]
pub struct AzureHandler {
    config: AzureAuth,
}

impl AzureHandler {
    pub fn new(config: AzureAuth) -> Self {
        Self { config }
    }

    pub fn handle(&self, header_mutation: &mut HeaderMutation) -> Result<(), AuthError> {
        let token = read_trimmed(&self.config.filename)?;
        set_header(header_mutation, "authorization", format!("Bearer {token}"));
        Ok(())
    }
}
