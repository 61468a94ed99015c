//! GCP workload-identity-federation token rotation: a signed JWT from the
//! OIDC provider is exchanged at Google STS for a federated token, which
//! then impersonates the target service account to mint the access token
//! the request-path handler serves from disk.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use crate::gcp::CLIENT_SECRET_KEY;

use super::{CredentialStore, RotateError, TokenExpiry};

const STS_TOKEN_URL: &str = "https://sts.googleapis.com/v1/token";
const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";
const TOKEN_TYPE_JWT: &str = "urn:ietf:params:oauth:token-type:jwt";
const IAM_SCOPE: &str = "https://www.googleapis.com/auth/iam";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatorConfig {
    /// Backend name this rotator serves; used for logging only.
    pub backend: String,
    /// Credential file shared with the GCP auth handler.
    pub credential_file_name: String,
    /// How far ahead of expiry to rotate, seconds.
    #[serde(default = "default_pre_rotation_window")]
    pub pre_rotation_window_secs: u64,
    /// Scheduler poll interval, seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    pub oidc: OidcProviderConfig,
    pub workload_identity: WorkloadIdentityConfig,
}

fn default_pre_rotation_window() -> u64 {
    300
}

fn default_check_interval() -> u64 {
    60
}

impl RotatorConfig {
    pub fn load(path: &str) -> Result<RotatorConfig, RotateError> {
        let raw = std::fs::read(path).map_err(|err| RotateError::Config(err.to_string()))?;
        serde_yaml::from_slice(&raw).map_err(|err| RotateError::Config(err.to_string()))
    }

    pub fn pre_rotation_window(&self) -> Duration {
        Duration::from_secs(self.pre_rotation_window_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcProviderConfig {
    pub token_url: String,
    pub client_id: String,
    /// File holding the OIDC client secret.
    pub client_secret_file: String,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIdentityConfig {
    pub project_id: String,
    pub workload_identity_pool_name: String,
    pub workload_identity_provider_name: String,
    pub service_account_name: String,
    pub service_account_project_name: String,
}

impl WorkloadIdentityConfig {
    fn sts_audience(&self) -> String {
        format!(
            "//iam.googleapis.com/projects/{}/locations/global/workloadIdentityPools/{}/providers/{}",
            self.project_id, self.workload_identity_pool_name, self.workload_identity_provider_name
        )
    }

    fn service_account_email(&self) -> String {
        format!(
            "{}@{}.iam.gserviceaccount.com",
            self.service_account_name, self.service_account_project_name
        )
    }
}

pub struct GcpTokenRotator {
    config: RotatorConfig,
    client: reqwest::Client,
    store: CredentialStore,
    sts_url: String,
    iam_credentials_url: String,
}

impl GcpTokenRotator {
    pub fn new(config: RotatorConfig) -> Self {
        let store = CredentialStore::new(&config.credential_file_name);
        Self {
            config,
            client: reqwest::Client::new(),
            store,
            sts_url: STS_TOKEN_URL.to_string(),
            iam_credentials_url: "https://iamcredentials.googleapis.com".to_string(),
        }
    }

    /// Test constructor pointing the exchange endpoints somewhere local.
    pub fn with_endpoints(config: RotatorConfig, sts_url: String, iam_credentials_url: String) -> Self {
        let store = CredentialStore::new(&config.credential_file_name);
        Self {
            config,
            client: reqwest::Client::new(),
            store,
            sts_url,
            iam_credentials_url,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.backend
    }

    pub fn check_interval(&self) -> Duration {
        self.config.check_interval()
    }

    /// When the current credential should be renewed, or `None` when no
    /// credential exists yet.
    pub fn pre_rotation_time(&self) -> Result<Option<OffsetDateTime>, RotateError> {
        Ok(self
            .store
            .expires_at()?
            .map(|expires_at| expires_at - self.config.pre_rotation_window()))
    }

    /// Runs the full exchange and persists the fresh token. Returns its
    /// expiry.
    pub async fn rotate(&self) -> Result<OffsetDateTime, RotateError> {
        info!(event = "token_rotation_start", backend = %self.config.backend);
        let subject_token = self.fetch_oidc_token().await?;
        let sts_token = self.exchange_jwt_for_sts_token(&subject_token).await?;
        let access_token = self.impersonate_service_account(&sts_token).await?;
        self.store.write(CLIENT_SECRET_KEY, &access_token)?;
        Ok(access_token.expires_at)
    }

    async fn fetch_oidc_token(&self) -> Result<String, RotateError> {
        let oidc = &self.config.oidc;
        let client_secret = std::fs::read_to_string(&oidc.client_secret_file)
            .map_err(|err| RotateError::Oidc(format!("client secret unreadable: {err}")))?;

        #[derive(Serialize)]
        struct TokenRequest<'a> {
            grant_type: &'static str,
            client_id: &'a str,
            client_secret: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            scope: Option<&'a str>,
        }
        #[derive(Deserialize)]
        struct TokenResponse {
            id_token: Option<String>,
            access_token: Option<String>,
        }

        let response = self
            .client
            .post(&oidc.token_url)
            .form(&TokenRequest {
                grant_type: "client_credentials",
                client_id: &oidc.client_id,
                client_secret: client_secret.trim(),
                scope: oidc.scope.as_deref(),
            })
            .send()
            .await
            .map_err(|err| RotateError::Oidc(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RotateError::Oidc(format!("{status}: {body}")));
        }
        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| RotateError::Oidc(err.to_string()))?;
        payload
            .id_token
            .or(payload.access_token)
            .ok_or_else(|| RotateError::Oidc("token endpoint returned no token".to_string()))
    }

    async fn exchange_jwt_for_sts_token(&self, jwt: &str) -> Result<String, RotateError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ExchangeRequest<'a> {
            grant_type: &'static str,
            audience: String,
            scope: &'static str,
            requested_token_type: &'static str,
            subject_token: &'a str,
            subject_token_type: &'static str,
        }
        #[derive(Deserialize)]
        struct ExchangeResponse {
            access_token: String,
        }

        let response = self
            .client
            .post(&self.sts_url)
            .json(&ExchangeRequest {
                grant_type: GRANT_TYPE_TOKEN_EXCHANGE,
                audience: self.config.workload_identity.sts_audience(),
                scope: IAM_SCOPE,
                requested_token_type: TOKEN_TYPE_ACCESS_TOKEN,
                subject_token: jwt,
                subject_token_type: TOKEN_TYPE_JWT,
            })
            .send()
            .await
            .map_err(|err| RotateError::StsExchange(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RotateError::StsExchange(format!("{status}: {body}")));
        }
        let payload: ExchangeResponse = response
            .json()
            .await
            .map_err(|err| RotateError::StsExchange(err.to_string()))?;
        Ok(payload.access_token)
    }

    async fn impersonate_service_account(&self, sts_token: &str) -> Result<TokenExpiry, RotateError> {
        #[derive(Serialize)]
        struct ImpersonationRequest {
            scope: Vec<&'static str>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ImpersonationResponse {
            access_token: String,
            expire_time: String,
        }

        let url = format!(
            "{}/v1/projects/-/serviceAccounts/{}:generateAccessToken",
            self.iam_credentials_url,
            self.config.workload_identity.service_account_email()
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(sts_token)
            .json(&ImpersonationRequest {
                scope: vec![CLOUD_PLATFORM_SCOPE],
            })
            .send()
            .await
            .map_err(|err| RotateError::Impersonation(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RotateError::Impersonation(format!("{status}: {body}")));
        }
        let payload: ImpersonationResponse = response
            .json()
            .await
            .map_err(|err| RotateError::Impersonation(err.to_string()))?;
        let expires_at = OffsetDateTime::parse(&payload.expire_time, &Rfc3339)
            .map_err(|err| RotateError::Impersonation(format!("bad expireTime: {err}")))?;
        Ok(TokenExpiry {
            token: payload.access_token,
            expires_at,
        })
    }
}
