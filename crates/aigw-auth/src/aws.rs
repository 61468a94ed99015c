//! AWS Signature Version 4 signing for Bedrock-bound requests.
//!
//! The signature covers method, canonical path/query, the `host` and
//! `x-amz-date` headers (plus the session token when present) and the
//! SHA-256 of the outgoing body. Credentials are re-read from the shared
//! credentials file on every call; rotation is external.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use aigw_envoy::{set_header, HeaderMutation};
use aigw_filterapi::AwsAuth;

use crate::{AuthError, RequestHeaders};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "bedrock";
const AMZ_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");
const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year][month][day]");

#[derive(Debug)]
pub struct AwsHandler {
    config: AwsAuth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsHandler {
    pub fn new(config: AwsAuth) -> Self {
        Self { config }
    }

    pub fn handle(
        &self,
        request_headers: &RequestHeaders,
        header_mutation: &mut HeaderMutation,
        body: &[u8],
    ) -> Result<(), AuthError> {
        self.handle_at(request_headers, header_mutation, body, OffsetDateTime::now_utc())
    }

    /// Signing with an explicit timestamp, split out so tests are
    /// deterministic.
    pub fn handle_at(
        &self,
        request_headers: &RequestHeaders,
        header_mutation: &mut HeaderMutation,
        body: &[u8],
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        let credentials = load_credentials(&self.config.credential_file_name)?;
        let method = request_headers
            .get(":method")
            .map(String::as_str)
            .unwrap_or("POST");
        let raw_path = request_headers
            .get(":path")
            .map(String::as_str)
            .unwrap_or("/");
        let host = request_headers
            .get(":authority")
            .or_else(|| request_headers.get("host"))
            .cloned()
            .unwrap_or_else(|| format!("bedrock-runtime.{}.amazonaws.com", self.config.region));

        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path, query),
            None => (raw_path, ""),
        };

        let amz_date = now.format(AMZ_DATE_FORMAT).unwrap_or_default();
        let date = now.format(DATE_FORMAT).unwrap_or_default();
        let payload_hash = hex_sha256(body);

        let mut canonical_headers = vec![
            ("host", host.as_str()),
            ("x-amz-date", amz_date.as_str()),
        ];
        if let Some(token) = credentials.session_token.as_deref() {
            canonical_headers.push(("x-amz-security-token", token));
        }
        let signed_headers = canonical_headers
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<&str>>()
            .join(";");
        let canonical_header_block = canonical_headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect::<String>();

        let canonical_request = format!(
            "{method}\n{}\n{}\n{canonical_header_block}\n{signed_headers}\n{payload_hash}",
            canonical_uri(path),
            canonical_query(query),
        );

        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );

        let signature = hex::encode(hmac_chain(
            &credentials.secret_access_key,
            &date,
            &self.config.region,
            &string_to_sign,
        ));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        );

        set_header(header_mutation, "authorization", authorization);
        set_header(header_mutation, "x-amz-date", amz_date);
        set_header(header_mutation, "x-amz-content-sha256", payload_hash);
        if let Some(token) = credentials.session_token {
            set_header(header_mutation, "x-amz-security-token", token);
        }
        Ok(())
    }
}

/// Shared-credentials file format: `aws_access_key_id = …` lines, optional
/// `[default]` section header.
fn load_credentials(path: &str) -> Result<AwsCredentials, AuthError> {
    let raw = std::fs::read_to_string(path).map_err(|source| AuthError::CredentialFile {
        path: path.to_string(),
        source,
    })?;
    let mut access_key_id = None;
    let mut secret_access_key = None;
    let mut session_token = None;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('[') || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().to_string();
            match key.trim() {
                "aws_access_key_id" => access_key_id = Some(value),
                "aws_secret_access_key" => secret_access_key = Some(value),
                "aws_session_token" => session_token = Some(value),
                _ => {}
            }
        }
    }
    Ok(AwsCredentials {
        access_key_id: access_key_id
            .ok_or(AuthError::MissingCredential(path.to_string(), "aws_access_key_id"))?,
        secret_access_key: secret_access_key.ok_or(AuthError::MissingCredential(
            path.to_string(),
            "aws_secret_access_key",
        ))?,
        session_token,
    })
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_chain(secret: &str, date: &str, region: &str, string_to_sign: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, SERVICE.as_bytes());
    let k_signing = hmac(&k_service, b"aws4_request");
    hmac(&k_signing, string_to_sign.as_bytes())
}

/// Percent-encodes each path segment the way SigV4 expects; the separator
/// slashes are preserved.
fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(uri_encode)
        .collect::<Vec<String>>()
        .join("/")
}

fn canonical_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (uri_encode(key), uri_encode(value)),
            None => (uri_encode(pair), String::new()),
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<String>>()
        .join("&")
}

fn uri_encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn write_credentials(name: &str, body: &str) -> String {
        let dir = std::env::temp_dir().join("aigw-aws-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn headers_for(path: &str) -> RequestHeaders {
        let mut headers = RequestHeaders::new();
        headers.insert(":method".to_string(), "POST".to_string());
        headers.insert(":path".to_string(), path.to_string());
        headers.insert(
            ":authority".to_string(),
            "bedrock-runtime.us-east-1.amazonaws.com".to_string(),
        );
        headers
    }

    fn mutation_header<'m>(mutation: &'m HeaderMutation, key: &str) -> Option<String> {
        mutation
            .set_headers
            .iter()
            .map(|option| option.header.as_ref().unwrap())
            .find(|header| header.key == key)
            .map(|header| String::from_utf8_lossy(&header.raw_value).into_owned())
    }

    #[test]
    fn signs_with_stable_output() {
        let path = write_credentials(
            "basic",
            "[default]\naws_access_key_id = AKIDEXAMPLE\naws_secret_access_key = secret\n",
        );
        let handler = AwsHandler::new(AwsAuth {
            credential_file_name: path,
            region: "us-east-1".to_string(),
        });
        let headers = headers_for("/model/us.meta.llama3-2-1b-instruct-v1:0/converse");
        let now = datetime!(2026-01-02 03:04:05 UTC);

        let mut first = HeaderMutation::default();
        handler.handle_at(&headers, &mut first, b"{}", now).unwrap();
        let mut second = HeaderMutation::default();
        handler.handle_at(&headers, &mut second, b"{}", now).unwrap();
        assert_eq!(first, second);

        let authorization = mutation_header(&first, "authorization").unwrap();
        assert!(authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260102/us-east-1/bedrock/aws4_request"
        ));
        assert!(authorization.contains("SignedHeaders=host;x-amz-date,"));
        assert_eq!(mutation_header(&first, "x-amz-date").unwrap(), "20260102T030405Z");
        assert_eq!(
            mutation_header(&first, "x-amz-content-sha256").unwrap(),
            hex_sha256(b"{}")
        );
    }

    #[test]
    fn session_token_is_signed_and_forwarded() {
        let path = write_credentials(
            "session",
            "aws_access_key_id = AKID\naws_secret_access_key = s\naws_session_token = tok\n",
        );
        let handler = AwsHandler::new(AwsAuth {
            credential_file_name: path,
            region: "us-west-2".to_string(),
        });
        let mut mutation = HeaderMutation::default();
        handler
            .handle_at(
                &headers_for("/model/m/converse"),
                &mut mutation,
                b"",
                datetime!(2026-01-02 00:00:00 UTC),
            )
            .unwrap();
        let authorization = mutation_header(&mutation, "authorization").unwrap();
        assert!(authorization.contains("SignedHeaders=host;x-amz-date;x-amz-security-token,"));
        assert_eq!(mutation_header(&mutation, "x-amz-security-token").unwrap(), "tok");
    }

    #[test]
    fn body_changes_the_signature() {
        let path = write_credentials(
            "body",
            "aws_access_key_id = AKID\naws_secret_access_key = s\n",
        );
        let handler = AwsHandler::new(AwsAuth {
            credential_file_name: path,
            region: "us-east-1".to_string(),
        });
        let now = datetime!(2026-01-02 00:00:00 UTC);
        let headers = headers_for("/model/m/converse");

        let mut a = HeaderMutation::default();
        handler.handle_at(&headers, &mut a, b"one", now).unwrap();
        let mut b = HeaderMutation::default();
        handler.handle_at(&headers, &mut b, b"two", now).unwrap();
        assert_ne!(
            mutation_header(&a, "authorization"),
            mutation_header(&b, "authorization")
        );
    }

    #[test]
    fn canonical_uri_escapes_segments() {
        assert_eq!(
            canonical_uri("/model/us.meta.llama3-2-1b-instruct-v1:0/converse"),
            "/model/us.meta.llama3-2-1b-instruct-v1%3A0/converse"
        );
    }

    #[test]
    fn canonical_query_sorts_pairs() {
        assert_eq!(canonical_query("b=2&a=1"), "a=1&b=2");
    }

    #[test]
    fn missing_secret_is_reported() {
        let path = write_credentials("partial", "aws_access_key_id = AKID\n");
        assert!(matches!(
            load_credentials(&path),
            Err(AuthError::MissingCredential(_, "aws_secret_access_key"))
        ));
    }
}
