//! `data:` URI parsing for inline request content.
//!
//! Parsed once into `(media type, bytes)` so translators never pass the
//! raw string around.

use base64::Engine;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DataUriError {
    #[error("data uri does not have a valid format")]
    Malformed,
    #[error("data uri is not base64 encoded")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
}

pub fn is_data_uri(uri: &str) -> bool {
    uri.starts_with("data:")
}

/// Parses e.g. `data:image/jpeg;base64,/9j/4AAQ...` into
/// `("image/jpeg", bytes)`.
pub fn parse_data_uri(uri: &str) -> Result<(String, Vec<u8>), DataUriError> {
    let rest = uri.strip_prefix("data:").ok_or(DataUriError::Malformed)?;
    let (meta, payload) = rest.split_once(',').ok_or(DataUriError::Malformed)?;
    let media_type = match meta.strip_suffix(";base64") {
        Some(media_type) => media_type,
        None => return Err(DataUriError::NotBase64),
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|err| DataUriError::InvalidBase64(err.to_string()))?;
    Ok((media_type.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn parses_base64_image() {
        let encoded = STANDARD.encode(b"fakejpeg");
        let uri = format!("data:image/jpeg;base64,{encoded}");
        let (media_type, bytes) = parse_data_uri(&uri).unwrap();
        assert_eq!(media_type, "image/jpeg");
        assert_eq!(bytes, b"fakejpeg");
    }

    #[test]
    fn rejects_missing_comma() {
        assert_eq!(parse_data_uri("data:image/png;base64"), Err(DataUriError::Malformed));
    }

    #[test]
    fn rejects_plain_encoding() {
        assert_eq!(
            parse_data_uri("data:text/plain,hello"),
            Err(DataUriError::NotBase64)
        );
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(matches!(
            parse_data_uri("data:image/png;base64,@@@@"),
            Err(DataUriError::InvalidBase64(_))
        ));
    }
}
