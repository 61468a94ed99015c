//! Dynamic-metadata emission: token tallies and configured request costs,
//! written once per stream on the terminal response-body message under the
//! configured namespace, for sibling filters (rate limiting) to consume.

use aigw_filterapi::{Config, LlmRequestCostType};
use aigw_transform::TokenUsage;
use prost_types::value::Kind;
use prost_types::{Struct, Value};
use tracing::warn;

pub const TOKEN_USAGE_INPUT_KEY: &str = "token_usage_input";
pub const TOKEN_USAGE_OUTPUT_KEY: &str = "token_usage_output";
pub const TOKEN_USAGE_TOTAL_KEY: &str = "token_usage_total";

/// Builds the namespaced metadata struct, or `None` when the configuration
/// names no namespace.
pub fn build_dynamic_metadata(
    config: &Config,
    usage: &TokenUsage,
    model: &str,
    backend: &str,
) -> Option<Struct> {
    if config.metadata_namespace.is_empty() {
        return None;
    }

    let mut fields = std::collections::BTreeMap::new();
    fields.insert(
        TOKEN_USAGE_INPUT_KEY.to_string(),
        number(f64::from(usage.input_tokens)),
    );
    fields.insert(
        TOKEN_USAGE_OUTPUT_KEY.to_string(),
        number(f64::from(usage.output_tokens)),
    );
    fields.insert(
        TOKEN_USAGE_TOTAL_KEY.to_string(),
        number(f64::from(usage.total_tokens)),
    );

    for cost in &config.llm_request_costs {
        let value = match cost.r#type {
            LlmRequestCostType::InputToken => Some(f64::from(usage.input_tokens)),
            LlmRequestCostType::OutputToken => Some(f64::from(usage.output_tokens)),
            LlmRequestCostType::TotalToken => Some(f64::from(usage.total_tokens)),
            LlmRequestCostType::Cel => evaluate_cel(
                cost.cel.as_deref().unwrap_or_default(),
                usage,
                model,
                backend,
            ),
        };
        if let Some(value) = value {
            fields.insert(cost.metadata_key.clone(), number(value));
        }
    }

    let inner = Struct { fields };
    let mut namespaced = std::collections::BTreeMap::new();
    namespaced.insert(
        config.metadata_namespace.clone(),
        Value {
            kind: Some(Kind::StructValue(inner)),
        },
    );
    Some(Struct { fields: namespaced })
}

/// Expressions are validated at config load; runtime failures only skip
/// the one key.
fn evaluate_cel(expression: &str, usage: &TokenUsage, model: &str, backend: &str) -> Option<f64> {
    let program = match cel_interpreter::Program::compile(expression) {
        Ok(program) => program,
        Err(err) => {
            warn!(event = "cel_compile_failed", expression = %expression, error = %err);
            return None;
        }
    };
    let mut context = cel_interpreter::Context::default();
    context.add_variable_from_value("input_tokens", u64::from(usage.input_tokens));
    context.add_variable_from_value("output_tokens", u64::from(usage.output_tokens));
    context.add_variable_from_value("total_tokens", u64::from(usage.total_tokens));
    context.add_variable_from_value("model", model.to_string());
    context.add_variable_from_value("backend", backend.to_string());

    match program.execute(&context) {
        Ok(cel_interpreter::Value::Int(value)) => Some(value as f64),
        Ok(cel_interpreter::Value::UInt(value)) => Some(value as f64),
        Ok(cel_interpreter::Value::Float(value)) => Some(value),
        Ok(other) => {
            warn!(event = "cel_non_numeric_result", expression = %expression, result = ?other);
            None
        }
        Err(err) => {
            warn!(event = "cel_eval_failed", expression = %expression, error = %err);
            None
        }
    }
}

fn number(value: f64) -> Value {
    Value {
        kind: Some(Kind::NumberValue(value)),
    }
}
