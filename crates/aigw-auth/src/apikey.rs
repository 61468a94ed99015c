use aigw_envoy::{set_header, HeaderMutation};
use aigw_filterapi::ApiKeyAuth;

use crate::{read_trimmed, AuthError};

#[derive(Debug)]
pub struct ApiKeyHandler {
    config: ApiKeyAuth,
}

impl ApiKeyHandler {
    pub fn new(config: ApiKeyAuth) -> Self {
        Self { config }
    }

    pub fn handle(&self, header_mutation: &mut HeaderMutation) -> Result<(), AuthError> {
        let key = read_trimmed(&self.config.filename)?;
        set_header(header_mutation, "authorization", format!("Bearer {key}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_bearer_header() {
        let dir = std::env::temp_dir().join("aigw-apikey-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("apikey");
        std::fs::write(&path, "sk-test-key\n").unwrap();

        let handler = ApiKeyHandler::new(ApiKeyAuth {
            filename: path.to_str().unwrap().to_string(),
        });
        let mut mutation = HeaderMutation::default();
        handler.handle(&mut mutation).unwrap();
        let header = mutation.set_headers[0].header.as_ref().unwrap();
        assert_eq!(header.key, "authorization");
        assert_eq!(header.raw_value, b"Bearer sk-test-key");
    }

    #[test]
    fn missing_file_is_an_error() {
        let handler = ApiKeyHandler::new(ApiKeyAuth {
            filename: "/nonexistent/apikey".to_string(),
        });
        let mut mutation = HeaderMutation::default();
        assert!(matches!(
            handler.handle(&mut mutation),
            Err(AuthError::CredentialFile { .. })
        ));
    }
}
