//! Condition evaluator — pure predicate matching against event payloads.
//!
//! Conditions are a map of payload field → predicate. A bare value is an
//! equality check; an object is a structured predicate whose operator
//! keys ($eq, $ne, $in, $gt, $lt, $exists) are AND-ed. Unknown operator
//! keys are ignored, not an error. No I/O, no side effects.

use serde_json::Value;

/// Evaluate a condition map against an event payload. An empty or absent
/// condition map always matches — the rule fires unconditionally.
pub fn evaluate(conditions: &Value, payload: &Value) -> bool {
    let Some(map) = conditions.as_object() else {
        return true;
    };
    map.iter()
        .all(|(field, predicate)| field_matches(predicate, payload.get(field)))
}

fn field_matches(predicate: &Value, actual: Option<&Value>) -> bool {
    match predicate.as_object() {
        // Structured predicate: all recognized operators must hold.
        Some(ops) => ops.iter().all(|(op, arg)| op_matches(op, arg, actual)),
        // Bare literal: equality. A missing field never equals a literal.
        None => actual == Some(predicate),
    }
}

fn op_matches(op: &str, arg: &Value, actual: Option<&Value>) -> bool {
    match op {
        "$eq" => actual == Some(arg),
        "$ne" => actual != Some(arg),
        "$in" => arg
            .as_array()
            .is_some_and(|set| actual.is_some_and(|v| set.contains(v))),
        // Comparisons on a missing or non-numeric field are false.
        "$gt" => compare(actual, arg).is_some_and(|(a, b)| a > b),
        "$lt" => compare(actual, arg).is_some_and(|(a, b)| a < b),
        "$exists" => arg.as_bool().is_some_and(|want| want == actual.is_some()),
        // Unknown operator keys are ignored.
        _ => true,
    }
}

fn compare(actual: Option<&Value>, arg: &Value) -> Option<(f64, f64)> {
    Some((actual?.as_f64()?, arg.as_f64()?))
}
