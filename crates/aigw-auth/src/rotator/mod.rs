//! Scheduled credential rotation.
//!
//! Rotators run outside the request path and keep mounted credential files
//! fresh; request-path handlers only ever read files. Files are replaced
//! with a temp-file + atomic rename so readers never observe a torn write,
//! and rotation happens a pre-rotation window ahead of expiry so stale
//! reads within the window stay valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

mod gcp;

pub use gcp::{GcpTokenRotator, OidcProviderConfig, RotatorConfig, WorkloadIdentityConfig};

#[derive(Debug, thiserror::Error)]
pub enum RotateError {
    #[error("failed to read rotator config: {0}")]
    Config(String),
    #[error("oidc token request failed: {0}")]
    Oidc(String),
    #[error("sts token exchange failed: {0}")]
    StsExchange(String),
    #[error("service account impersonation failed: {0}")]
    Impersonation(String),
    #[error("failed to persist credential file: {0}")]
    Store(#[from] std::io::Error),
    #[error("credential file has an invalid expiry: {0}")]
    InvalidExpiry(String),
}

/// A token plus when it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExpiry {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// File-backed secret store shared between rotators and auth handlers.
/// Entries are `key: value` lines; expiry rides along as its own entry.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

const EXPIRES_AT_KEY: &str = "expires-at";

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomic replace: write a sibling temp file, then rename over the
    /// target.
    pub fn write(&self, key: &str, token: &TokenExpiry) -> Result<(), RotateError> {
        let expires = token
            .expires_at
            .format(&Rfc3339)
            .map_err(|err| RotateError::InvalidExpiry(err.to_string()))?;
        let body = format!("{key}: {}\n{EXPIRES_AT_KEY}: {expires}\n", token.token);

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn read_entry(&self, key: &str) -> Result<Option<String>, RotateError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        for line in raw.lines() {
            if let Some((name, value)) = line.split_once(':') {
                if name.trim() == key {
                    return Ok(Some(value.trim().to_string()));
                }
            }
        }
        Ok(None)
    }

    pub fn expires_at(&self) -> Result<Option<OffsetDateTime>, RotateError> {
        match self.read_entry(EXPIRES_AT_KEY)? {
            Some(raw) => OffsetDateTime::parse(&raw, &Rfc3339)
                .map(Some)
                .map_err(|err| RotateError::InvalidExpiry(err.to_string())),
            None => Ok(None),
        }
    }
}

/// True once `now` has passed the pre-rotation point.
pub fn is_buffered_time_expired(buffer: Duration, expires_at: OffsetDateTime) -> bool {
    expires_at - buffer <= OffsetDateTime::now_utc()
}

/// Drives one rotator forever. Rotation failures are logged and retried on
/// the next tick; the previous token stays in use until it really expires.
/// The loop ends when the owning task is aborted on shutdown.
pub async fn run_scheduler(rotator: GcpTokenRotator, check_interval: Duration) {
    let mut ticker = tokio::time::interval(check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let due = match rotator.pre_rotation_time() {
            Ok(Some(pre_rotation)) => is_buffered_time_expired(Duration::ZERO, pre_rotation),
            // No credential on disk yet.
            Ok(None) => true,
            Err(err) => {
                warn!(event = "rotator_state_unreadable", error = %err);
                true
            }
        };
        if !due {
            continue;
        }
        match rotator.rotate().await {
            Ok(expires_at) => {
                info!(event = "token_rotated", backend = %rotator.name(), expires_at = %expires_at);
            }
            Err(err) => {
                warn!(event = "token_rotation_failed", backend = %rotator.name(), error = %err);
            }
        }
    }
}
