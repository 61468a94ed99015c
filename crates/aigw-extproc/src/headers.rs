//! Header-map decoding shared by every processor phase.

use std::collections::HashMap;

use aigw_envoy::HeaderMap;

/// Lower-cased header name → value. Envoy populates either `value` or
/// `raw_value`; raw bytes are carried through lossily since header values
/// this processor inspects are ASCII.
pub fn decode_headers(headers: Option<&HeaderMap>) -> HashMap<String, String> {
    let mut decoded = HashMap::new();
    let Some(headers) = headers else {
        return decoded;
    };
    for header in &headers.headers {
        let value = if header.raw_value.is_empty() {
            header.value.clone()
        } else {
            String::from_utf8_lossy(&header.raw_value).into_owned()
        };
        decoded.insert(header.key.to_ascii_lowercase(), value);
    }
    decoded
}

pub fn header<'h>(headers: &'h HashMap<String, String>, key: &str) -> Option<&'h str> {
    headers.get(key).map(String::as_str)
}

/// `:status` as a numeric code; defaults to 200 when absent or garbled.
pub fn response_status(headers: &HashMap<String, String>) -> u16 {
    headers
        .get(":status")
        .and_then(|status| status.parse().ok())
        .unwrap_or(200)
}
