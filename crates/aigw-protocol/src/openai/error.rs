use serde::{Deserialize, Serialize};

/// Canonical error envelope returned on any 4xx/5xx originated by the
/// processor: `{"type":"error","error":{"type":…,"message":…,"code":…}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub r#type: ErrorEnvelopeType,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorEnvelopeType {
    #[serde(rename = "error")]
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub r#type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(kind: &str, message: impl Into<String>, status: u16) -> Self {
        Self {
            r#type: ErrorEnvelopeType::Error,
            error: ErrorBody {
                r#type: kind.to_string(),
                message: message.into(),
                code: Some(status.to_string()),
            },
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Serialization of this shape cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
