//! End-to-end scenarios: synthetic ext_proc phase messages driven through
//! the router-side and cluster-side processors, with real credential files
//! on disk.

use std::collections::HashMap;
use std::sync::Arc;

use aigw_envoy::{body_mutation, processing_response, HeaderMap, HeaderValue, HttpBody};
use aigw_extproc::{GatewayState, Processor, ProcessorError};
use aigw_filterapi::Config;

fn write_temp(name: &str, contents: &str) -> String {
    let dir = std::env::temp_dir().join("aigw-scenarios");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

fn gateway_state() -> Arc<GatewayState> {
    let apikey = write_temp("apikey", "sk-unit-test\n");
    let aws = write_temp(
        "aws-credentials",
        "[default]\naws_access_key_id = AKIDTEST\naws_secret_access_key = secret\n",
    );
    let gcp = write_temp(
        "gcp-credential",
        "client-secret: gcp-token\nexpires-at: 2099-01-01T00:00:00Z\n",
    );
    let config = format!(
        r#"
uuid: test
metadataNamespace: io.envoy.ai_gateway
schema:
  name: OpenAI
llmRequestCosts:
- metadataKey: output_cost
  type: OutputToken
models:
- name: gpt-4o-mini
  ownedBy: openai
- name: claude-3-5-haiku
  ownedBy: anthropic
rules:
- name: openai-route
  headers:
  - name: x-ai-eg-model
    value: gpt-4o-mini
  backends:
  - name: openai
    schema:
      name: OpenAI
    auth:
      apiKey:
        filename: {apikey}
- name: llama-route
  headers:
  - name: x-ai-eg-model
    value: us.meta.llama3-2-1b-instruct-v1:0
  backends:
  - name: bedrock
    schema:
      name: AWSBedrock
    auth:
      aws:
        credentialFileName: {aws}
        region: us-east-1
- name: claude-route
  headers:
  - name: x-ai-eg-model
    value: claude-3-5-haiku
  backends:
  - name: gcp-anthropic
    schema:
      name: GCPAnthropic
    auth:
      gcp:
        credentialFileName: {gcp}
        region: us-east5
        projectName: proj
"#
    );
    Arc::new(GatewayState::new(Config::from_slice(config.as_bytes()).unwrap()).unwrap())
}

fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
    HeaderMap {
        headers: pairs
            .iter()
            .map(|(key, value)| HeaderValue {
                key: key.to_string(),
                value: String::new(),
                raw_value: value.as_bytes().to_vec(),
            })
            .collect(),
    }
}

fn decoded(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    aigw_extproc::headers::decode_headers(Some(&header_map(pairs)))
}

fn body(bytes: &[u8], end_of_stream: bool) -> HttpBody {
    HttpBody {
        body: bytes.to_vec(),
        end_of_stream,
    }
}

struct PhaseOutput {
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
    clear_route_cache: bool,
    dynamic_metadata: Option<prost_types::Struct>,
}

fn unpack(response: aigw_envoy::ProcessingResponse) -> PhaseOutput {
    let common = match response.response.expect("response payload") {
        processing_response::Response::RequestHeaders(headers) => headers.response,
        processing_response::Response::ResponseHeaders(headers) => headers.response,
        processing_response::Response::RequestBody(body) => body.response,
        processing_response::Response::ResponseBody(body) => body.response,
        other => panic!("unexpected response kind: {other:?}"),
    }
    .unwrap_or_default();

    let mut headers = HashMap::new();
    if let Some(mutation) = &common.header_mutation {
        for option in &mutation.set_headers {
            let header = option.header.as_ref().unwrap();
            headers.insert(
                header.key.clone(),
                String::from_utf8_lossy(&header.raw_value).into_owned(),
            );
        }
    }
    let body = common.body_mutation.and_then(|mutation| match mutation.mutation {
        Some(body_mutation::Mutation::Body(bytes)) => Some(bytes),
        _ => None,
    });
    PhaseOutput {
        headers,
        body,
        clear_route_cache: common.clear_route_cache,
        dynamic_metadata: response.dynamic_metadata,
    }
}

fn assert_content_length_coherent(output: &PhaseOutput) {
    if let Some(body) = &output.body {
        assert_eq!(
            output.headers.get("content-length"),
            Some(&body.len().to_string()),
            "content-length must equal mutated body length"
        );
    }
}

/// Runs the routing-filter request phases and returns the body-phase
/// output.
fn run_request(state: &Arc<GatewayState>, request: serde_json::Value) -> PhaseOutput {
    let headers = decoded(&[(":method", "POST"), (":path", "/v1/chat/completions")]);
    let mut processor = Processor::dispatch(state.clone(), &headers);
    processor.process_request_headers(headers).unwrap();
    let raw = serde_json::to_vec(&request).unwrap();
    unpack(processor.process_request_body(&body(&raw, true)).unwrap())
}

fn run_request_err(state: &Arc<GatewayState>, request: serde_json::Value) -> ProcessorError {
    let headers = decoded(&[(":method", "POST"), (":path", "/v1/chat/completions")]);
    let mut processor = Processor::dispatch(state.clone(), &headers);
    processor.process_request_headers(headers).unwrap();
    let raw = serde_json::to_vec(&request).unwrap();
    processor.process_request_body(&body(&raw, true)).unwrap_err()
}

/// Runs the cluster-side filter over the already-mutated request.
fn run_upstream(
    state: &Arc<GatewayState>,
    extra_headers: &[(&str, &str)],
    request_body: &[u8],
) -> PhaseOutput {
    let mut pairs = vec![
        (":method", "POST"),
        (":path", "/v1/chat/completions"),
        ("x-ai-eg-upstream-filter", "true"),
    ];
    pairs.extend_from_slice(extra_headers);
    let headers = decoded(&pairs);
    let mut processor = Processor::dispatch(state.clone(), &headers);
    processor.process_request_headers(headers).unwrap();
    unpack(processor.process_request_body(&body(request_body, true)).unwrap())
}

#[test]
fn s1_openai_route_passthrough_with_api_key() {
    let state = gateway_state();
    let output = run_request(
        &state,
        serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "hi"}],
        }),
    );

    assert_eq!(output.headers.get("x-ai-eg-selected-route").unwrap(), "openai-route");
    assert_eq!(output.headers.get("x-ai-eg-model").unwrap(), "gpt-4o-mini");
    assert_eq!(output.headers.get("x-ai-eg-selected-backend").unwrap(), "openai");
    assert!(output.headers.get(":path").is_none(), "path must stay unchanged");
    assert!(output.body.is_none(), "body must stay unchanged");
    assert!(output.clear_route_cache);

    let upstream = run_upstream(&state, &[("x-ai-eg-selected-backend", "openai")], b"{}");
    assert_eq!(upstream.headers.get("authorization").unwrap(), "Bearer sk-unit-test");
}

#[test]
fn s2_bedrock_route_rewrites_to_converse_with_sigv4() {
    let state = gateway_state();
    let output = run_request(
        &state,
        serde_json::json!({
            "model": "us.meta.llama3-2-1b-instruct-v1:0",
            "messages": [{"role": "user", "content": "hi"}],
        }),
    );

    assert_eq!(
        output.headers.get(":path").unwrap(),
        "/model/us.meta.llama3-2-1b-instruct-v1:0/converse"
    );
    assert_content_length_coherent(&output);
    let converse: serde_json::Value = serde_json::from_slice(output.body.as_ref().unwrap()).unwrap();
    assert_eq!(converse["messages"].as_array().unwrap().len(), 1);
    assert_eq!(converse["messages"][0]["role"], "user");
    assert_eq!(converse["messages"][0]["content"][0]["text"], "hi");

    let upstream = run_upstream(
        &state,
        &[
            (":authority", "bedrock-runtime.us-east-1.amazonaws.com"),
            ("x-ai-eg-selected-backend", "bedrock"),
        ],
        output.body.as_deref().unwrap(),
    );
    let authorization = upstream.headers.get("authorization").unwrap();
    assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIDTEST/"));
    assert!(authorization.contains("/us-east-1/bedrock/aws4_request"));
    assert!(upstream.headers.contains_key("x-amz-date"));
    assert!(upstream.headers.contains_key("x-amz-content-sha256"));
}

#[test]
fn s3_gcp_anthropic_route_builds_vertex_request() {
    let state = gateway_state();
    let output = run_request(
        &state,
        serde_json::json!({
            "model": "claude-3-5-haiku",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10,
            "temperature": 0.5,
        }),
    );

    assert_eq!(
        output.headers.get(":path").unwrap(),
        "publishers/anthropic/models/claude-3-5-haiku:rawPredict"
    );
    assert_content_length_coherent(&output);
    let vertex: serde_json::Value = serde_json::from_slice(output.body.as_ref().unwrap()).unwrap();
    assert_eq!(vertex["anthropic_version"], "vertex-2023-10-16");
    assert!(vertex.get("model").is_none());

    let upstream = run_upstream(
        &state,
        &[
            (":path", "publishers/anthropic/models/claude-3-5-haiku:rawPredict"),
            ("x-ai-eg-selected-backend", "gcp-anthropic"),
        ],
        output.body.as_deref().unwrap(),
    );
    assert_eq!(
        upstream.headers.get(":path").unwrap(),
        "/v1/projects/proj/locations/us-east5/publishers/anthropic/models/claude-3-5-haiku:rawPredict"
    );
    assert_eq!(upstream.headers.get("authorization").unwrap(), "Bearer gcp-token");
}

#[test]
fn s4_high_temperature_for_anthropic_is_rejected() {
    let state = gateway_state();
    let err = run_request_err(
        &state,
        serde_json::json!({
            "model": "claude-3-5-haiku",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10,
            "temperature": 1.5,
        }),
    );
    assert_eq!(err.status(), 400);

    let response = err.to_immediate_response();
    let Some(processing_response::Response::ImmediateResponse(immediate)) = response.response else {
        panic!("expected immediate response");
    };
    assert_eq!(immediate.status.unwrap().code, 400);
    let envelope: serde_json::Value = serde_json::from_slice(&immediate.body).unwrap();
    assert!(envelope["error"]["message"]
        .as_str()
        .unwrap()
        .contains("temperature 1.50 is not supported by Anthropic"));
}

#[test]
fn s5_models_list_is_an_immediate_response() {
    let state = gateway_state();
    let headers = decoded(&[(":method", "GET"), (":path", "/v1/models")]);
    let mut processor = Processor::dispatch(state.clone(), &headers);
    let response = processor.process_request_headers(headers).unwrap();

    let Some(processing_response::Response::ImmediateResponse(immediate)) = response.response else {
        panic!("expected immediate response");
    };
    assert_eq!(immediate.status.unwrap().code, 200);
    let content_type = immediate
        .headers
        .as_ref()
        .unwrap()
        .set_headers
        .iter()
        .map(|option| option.header.as_ref().unwrap())
        .find(|header| header.key == "content-type")
        .unwrap();
    assert_eq!(content_type.raw_value, b"application/json");

    let list: serde_json::Value = serde_json::from_slice(&immediate.body).unwrap();
    assert_eq!(list["object"], "list");
    let data = list["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["object"], "model");
    assert_eq!(data[0]["id"], "gpt-4o-mini");
    assert_eq!(data[0]["owned_by"], "openai");
    assert!(data[0]["created"].is_i64());

    // Later phases are illegal for the models processor.
    assert!(matches!(
        processor.process_request_body(&body(b"{}", true)),
        Err(ProcessorError::UnexpectedCall(_))
    ));
}

#[test]
fn s6_anthropic_streaming_is_rejected() {
    let state = gateway_state();
    let err = run_request_err(
        &state,
        serde_json::json!({
            "model": "claude-3-5-haiku",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10,
            "stream": true,
        }),
    );
    assert_eq!(err.status(), 400);
    assert!(err.to_string().contains("streaming is not yet supported"));
}

#[test]
fn unmatched_model_is_404_model_not_found() {
    let state = gateway_state();
    let err = run_request_err(
        &state,
        serde_json::json!({
            "model": "unknown-model",
            "messages": [{"role": "user", "content": "hi"}],
        }),
    );
    assert_eq!(err.status(), 404);
    assert_eq!(err.kind(), "model_not_found");
}

#[test]
fn buffered_response_emits_usage_metadata() {
    let state = gateway_state();
    let headers = decoded(&[(":method", "POST"), (":path", "/v1/chat/completions")]);
    let mut processor = Processor::dispatch(state.clone(), &headers);
    processor.process_request_headers(headers).unwrap();
    let request = serde_json::json!({
        "model": "gpt-4o-mini",
        "messages": [{"role": "user", "content": "hi"}],
    });
    processor
        .process_request_body(&body(&serde_json::to_vec(&request).unwrap(), true))
        .unwrap();
    processor
        .process_response_headers(decoded(&[(":status", "200")]))
        .unwrap();

    let upstream_body = serde_json::json!({
        "id": "c", "object": "chat.completion", "created": 1, "model": "gpt-4o-mini",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"},
                     "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 2, "completion_tokens": 5, "total_tokens": 7}
    });
    let output = unpack(
        processor
            .process_response_body(&body(&serde_json::to_vec(&upstream_body).unwrap(), true))
            .unwrap(),
    );

    let metadata = output.dynamic_metadata.expect("dynamic metadata on terminal response");
    let namespace = &metadata.fields["io.envoy.ai_gateway"];
    let Some(prost_types::value::Kind::StructValue(fields)) = &namespace.kind else {
        panic!("expected namespaced struct");
    };
    let total = &fields.fields["token_usage_total"];
    assert_eq!(total.kind, Some(prost_types::value::Kind::NumberValue(7.0)));
    let cost = &fields.fields["output_cost"];
    assert_eq!(cost.kind, Some(prost_types::value::Kind::NumberValue(5.0)));
}

#[test]
fn streaming_bedrock_usage_is_monotonic_and_final_at_eos() {
    use aigw_protocol::bedrock::eventstream::encode_frame;

    let state = gateway_state();
    let headers = decoded(&[(":method", "POST"), (":path", "/v1/chat/completions")]);
    let mut processor = Processor::dispatch(state.clone(), &headers);
    processor.process_request_headers(headers).unwrap();
    let request = serde_json::json!({
        "model": "us.meta.llama3-2-1b-instruct-v1:0",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
    });
    processor
        .process_request_body(&body(&serde_json::to_vec(&request).unwrap(), true))
        .unwrap();
    processor
        .process_response_headers(decoded(&[(":status", "200")]))
        .unwrap();

    let event = |event_type: &str, payload: serde_json::Value| {
        encode_frame(
            &[(":message-type", "event"), (":event-type", event_type)],
            payload.to_string().as_bytes(),
        )
    };
    let chunks = [
        event("messageStart", serde_json::json!({"role": "assistant"})),
        event(
            "contentBlockDelta",
            serde_json::json!({"contentBlockIndex": 0, "delta": {"text": "hel"}}),
        ),
        event(
            "contentBlockDelta",
            serde_json::json!({"contentBlockIndex": 0, "delta": {"text": "lo"}}),
        ),
        event("messageStop", serde_json::json!({"stopReason": "end_turn"})),
        event(
            "metadata",
            serde_json::json!({"usage": {"inputTokens": 2, "outputTokens": 4, "totalTokens": 6}}),
        ),
    ];

    let mut final_metadata = None;
    let last = chunks.len() - 1;
    for (index, chunk) in chunks.iter().enumerate() {
        let response = processor
            .process_response_body(&body(chunk, index == last))
            .unwrap();
        let output = unpack(response);
        // Every streamed chunk replaces the binary frames with SSE bytes.
        assert!(output.body.is_some());
        if index == last {
            final_metadata = output.dynamic_metadata;
        } else {
            // Metadata only rides on the terminal message.
            assert!(output.dynamic_metadata.is_none());
        }
    }

    let metadata = final_metadata.expect("metadata on end_of_stream");
    let namespace = &metadata.fields["io.envoy.ai_gateway"];
    let Some(prost_types::value::Kind::StructValue(fields)) = &namespace.kind else {
        panic!("expected namespaced struct");
    };
    assert_eq!(
        fields.fields["token_usage_input"].kind,
        Some(prost_types::value::Kind::NumberValue(2.0))
    );
    assert_eq!(
        fields.fields["token_usage_output"].kind,
        Some(prost_types::value::Kind::NumberValue(4.0))
    );
    assert_eq!(
        fields.fields["token_usage_total"].kind,
        Some(prost_types::value::Kind::NumberValue(6.0))
    );
}

#[test]
fn upstream_error_bodies_become_canonical_envelopes() {
    let state = gateway_state();
    let headers = decoded(&[(":method", "POST"), (":path", "/v1/chat/completions")]);
    let mut processor = Processor::dispatch(state.clone(), &headers);
    processor.process_request_headers(headers).unwrap();
    let request = serde_json::json!({
        "model": "gpt-4o-mini",
        "messages": [{"role": "user", "content": "hi"}],
    });
    processor
        .process_request_body(&body(&serde_json::to_vec(&request).unwrap(), true))
        .unwrap();
    processor
        .process_response_headers(decoded(&[(":status", "429")]))
        .unwrap();

    let output = unpack(
        processor
            .process_response_body(&body(br#"{"error":{"message":"rate limited"}}"#, true))
            .unwrap(),
    );
    assert_content_length_coherent(&output);
    let envelope: serde_json::Value = serde_json::from_slice(output.body.as_ref().unwrap()).unwrap();
    assert_eq!(envelope["type"], "error");
    assert_eq!(envelope["error"]["message"], "rate limited");
    assert_eq!(envelope["error"]["code"], "429");
}

#[test]
fn adversarial_bodies_fail_without_panicking() {
    let state = gateway_state();

    for raw in [
        &b"{not json"[..],
        br#"{"messages":[{"role":"user","content":"hi"}]}"#,
        br#"{"model":123,"messages":[]}"#,
    ] {
        let headers = decoded(&[(":method", "POST"), (":path", "/v1/chat/completions")]);
        let mut processor = Processor::dispatch(state.clone(), &headers);
        processor.process_request_headers(headers).unwrap();
        let err = processor.process_request_body(&body(raw, true)).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    // Empty messages array routes fine and produces a valid backend body.
    let output = run_request(
        &state,
        serde_json::json!({"model": "us.meta.llama3-2-1b-instruct-v1:0", "messages": []}),
    );
    assert!(output.body.is_some());

    // Negative max_tokens decodes and is forwarded as-is for the backend
    // to reject.
    let output = run_request(
        &state,
        serde_json::json!({
            "model": "us.meta.llama3-2-1b-instruct-v1:0",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": -5,
        }),
    );
    assert_content_length_coherent(&output);

    // Broken base64 in a data URI is a 400, not a crash.
    let err = run_request_err(
        &state,
        serde_json::json!({
            "model": "claude-3-5-haiku",
            "messages": [{"role": "user", "content": [
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,@@bad@@"}}
            ]}],
            "max_tokens": 5,
        }),
    );
    assert_eq!(err.status(), 400);
}

#[test]
fn auth_is_idempotent_across_calls() {
    let state = gateway_state();
    let run = || {
        run_upstream(
            &state,
            &[
                (":path", "publishers/anthropic/models/claude-3-5-haiku:rawPredict"),
                ("x-ai-eg-selected-backend", "gcp-anthropic"),
            ],
            b"{}",
        )
    };
    let first = run();
    let second = run();
    assert_eq!(first.headers, second.headers);
}

#[test]
fn unknown_paths_pass_through_every_phase() {
    let state = gateway_state();
    let headers = decoded(&[(":method", "GET"), (":path", "/healthz")]);
    let mut processor = Processor::dispatch(state.clone(), &headers);

    let output = unpack(processor.process_request_headers(headers).unwrap());
    assert!(output.headers.is_empty());
    assert!(output.body.is_none());

    let output = unpack(processor.process_request_body(&body(b"x", true)).unwrap());
    assert!(output.body.is_none());
    let output = unpack(processor.process_response_headers(HashMap::new()).unwrap());
    assert!(output.headers.is_empty());
    let output = unpack(processor.process_response_body(&body(b"y", true)).unwrap());
    assert!(output.body.is_none());
}

#[test]
fn phase_order_violations_close_the_stream() {
    let state = gateway_state();
    let headers = decoded(&[(":method", "POST"), (":path", "/v1/chat/completions")]);
    let mut processor = Processor::dispatch(state.clone(), &headers);
    processor.process_request_headers(headers).unwrap();

    // Response body before response headers.
    let err = processor.process_response_body(&body(b"{}", true)).unwrap_err();
    assert!(err.closes_stream());
}
