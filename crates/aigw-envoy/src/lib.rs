//! Generated bindings for the Envoy external-processor protocol, plus small
//! helpers for building the mutations every translator and auth handler
//! returns.

pub mod envoy {
    pub mod config {
        pub mod core {
            pub mod v3 {
                tonic::include_proto!("envoy.config.core.v3");
            }
        }
    }

    pub mod r#type {
        pub mod v3 {
            tonic::include_proto!("envoy.type.v3");
        }
    }

    pub mod service {
        pub mod ext_proc {
            pub mod v3 {
                tonic::include_proto!("envoy.service.ext_proc.v3");
            }
        }
    }
}

pub use envoy::config::core::v3::{HeaderMap, HeaderValue, HeaderValueOption};
pub use envoy::r#type::v3::HttpStatus;
pub use envoy::service::ext_proc::v3::{
    body_mutation, external_processor_client, external_processor_server, processing_request,
    processing_response, BodyMutation, BodyResponse, CommonResponse, GrpcStatus, HeaderMutation,
    HeadersResponse, HttpBody, HttpHeaders, HttpTrailers, ImmediateResponse, ProcessingRequest,
    ProcessingResponse, TrailersResponse,
};

/// Appends a `set_headers` entry. Values go through `raw_value` so they are
/// never re-validated as UTF-8 by the proxy.
pub fn set_header(mutation: &mut HeaderMutation, key: &str, value: impl AsRef<[u8]>) {
    mutation.set_headers.push(HeaderValueOption {
        header: Some(HeaderValue {
            key: key.to_string(),
            value: String::new(),
            raw_value: value.as_ref().to_vec(),
        }),
        ..Default::default()
    });
}

/// Sets `content-length` to the byte length of a mutated body. Every body
/// mutation must carry this or the proxy forwards a stale length.
pub fn set_content_length(mutation: &mut HeaderMutation, body: &[u8]) {
    set_header(mutation, "content-length", body.len().to_string());
}

pub fn replace_body(body: Vec<u8>) -> BodyMutation {
    BodyMutation {
        mutation: Some(body_mutation::Mutation::Body(body)),
    }
}

pub fn clear_body() -> BodyMutation {
    BodyMutation {
        mutation: Some(body_mutation::Mutation::ClearBody(true)),
    }
}

/// Header and body mutations for a fully rewritten request: `:path`,
/// `content-length` and the replacement body.
pub fn request_mutations(path: &str, body: Vec<u8>) -> (HeaderMutation, BodyMutation) {
    let mut headers = HeaderMutation::default();
    set_header(&mut headers, ":path", path);
    set_content_length(&mut headers, &body);
    (headers, replace_body(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_header_uses_raw_value() {
        let mut mutation = HeaderMutation::default();
        set_header(&mut mutation, ":path", "/model/foo:converse");
        let header = mutation.set_headers[0].header.as_ref().unwrap();
        assert_eq!(header.key, ":path");
        assert!(header.value.is_empty());
        assert_eq!(header.raw_value, b"/model/foo:converse");
    }

    #[test]
    fn request_mutations_sets_length() {
        let (headers, body) = request_mutations("/v1/x", b"hello".to_vec());
        let length = headers
            .set_headers
            .iter()
            .find(|option| option.header.as_ref().unwrap().key == "content-length")
            .unwrap();
        assert_eq!(length.header.as_ref().unwrap().raw_value, b"5");
        match body.mutation {
            Some(body_mutation::Mutation::Body(bytes)) => assert_eq!(bytes, b"hello"),
            other => panic!("unexpected mutation: {other:?}"),
        }
    }
}
