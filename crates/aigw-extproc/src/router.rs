//! Model-based routing: the first rule whose header matches all hold wins,
//! then one backend is picked by weight. Selection is stateless.

use std::collections::HashMap;

use aigw_filterapi::{Backend, Config, RouteRule};
use rand::Rng;

use crate::error::ProcessorError;

pub struct RouteDecision {
    pub rule_name: String,
    pub backend: Backend,
}

/// Picks the rule and backend for a request. The decoded model name is
/// authoritative for the model header key, overriding any inbound header
/// with the same name.
pub fn select_route(
    config: &Config,
    headers: &HashMap<String, String>,
    model: &str,
) -> Result<RouteDecision, ProcessorError> {
    let rule = config
        .rules
        .iter()
        .find(|rule| rule_matches(rule, headers, model, &config.model_name_header_key))
        .ok_or(ProcessorError::ModelNotFound)?;
    let backend = pick_backend(&rule.backends, &mut rand::thread_rng());
    Ok(RouteDecision {
        rule_name: rule.name.clone(),
        backend: backend.clone(),
    })
}

fn rule_matches(
    rule: &RouteRule,
    headers: &HashMap<String, String>,
    model: &str,
    model_header_key: &str,
) -> bool {
    rule.headers.iter().all(|matcher| {
        let name = matcher.name.to_ascii_lowercase();
        let effective = if name == model_header_key {
            Some(model)
        } else {
            headers.get(&name).map(String::as_str)
        };
        effective == Some(matcher.value.as_str())
    })
}

/// Weighted random pick; weight defaults to 1 and zero excludes a backend
/// unless every weight is zero, in which case selection is uniform.
fn pick_backend<'b, R: Rng>(backends: &'b [Backend], rng: &mut R) -> &'b Backend {
    if backends.len() == 1 {
        return &backends[0];
    }
    let total: u64 = backends
        .iter()
        .map(|backend| u64::from(backend.weight.unwrap_or(1)))
        .sum();
    if total == 0 {
        return &backends[rng.gen_range(0..backends.len())];
    }
    let mut remaining = rng.gen_range(0..total);
    for backend in backends {
        let weight = u64::from(backend.weight.unwrap_or(1));
        if remaining < weight {
            return backend;
        }
        remaining -= weight;
    }
    // Unreachable with a positive total; keep the last backend as anchor.
    backends.last().expect("rules are validated non-empty")
}
