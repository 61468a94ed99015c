//! Process-wide shared state: the immutable configuration and the auth
//! handlers built from it. Everything here is read-only at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use aigw_auth::{AuthError, Handler};
use aigw_filterapi::Config;

pub struct GatewayState {
    pub config: Arc<Config>,
    auth_handlers: HashMap<String, Arc<Handler>>,
}

impl GatewayState {
    /// Builds per-backend auth handlers up front so malformed auth config
    /// fails at startup, not mid-request.
    pub fn new(config: Config) -> Result<GatewayState, AuthError> {
        let mut auth_handlers = HashMap::new();
        for rule in &config.rules {
            for backend in &rule.backends {
                if let Some(auth) = &backend.auth {
                    auth_handlers.insert(backend.name.clone(), Arc::new(Handler::new(auth)?));
                }
            }
        }
        Ok(GatewayState {
            config: Arc::new(config),
            auth_handlers,
        })
    }

    pub fn auth_handler(&self, backend: &str) -> Option<Arc<Handler>> {
        self.auth_handlers.get(backend).cloned()
    }
}
