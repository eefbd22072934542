//! Mechanical repair of near-miss model output.
//!
//! Repairs never invent data. They only normalize what the model already
//! produced:
//! - string values are trimmed
//! - keys that match a schema property modulo case, `_`, `-` and spaces are renamed
//! - enum strings are case-folded onto the declared member
//! - numeric and boolean strings are coerced when the schema asks for those types
//! - a single-element array is unwrapped when the schema expects an object

use serde_json::{Map, Value};

/// Repaired candidates for `value`, one per union alternative (or one for a
/// plain schema). The caller validates them in order.
pub(crate) fn candidates(value: &Value, schema: &Value) -> Vec<Value> {
    match alternatives(schema) {
        Some(alts) => alts.iter().map(|alt| repair(value, alt)).collect(),
        None => vec![repair(value, schema)],
    }
}

fn alternatives(schema: &Value) -> Option<&Vec<Value>> {
    schema
        .get("anyOf")
        .or_else(|| schema.get("oneOf"))
        .and_then(Value::as_array)
}

fn repair(value: &Value, schema: &Value) -> Value {
    if let Some(alts) = alternatives(schema) {
        // Nested unions: take the first alternative whose declared type fits.
        return alts
            .iter()
            .find(|alt| type_fits(value, alt))
            .map(|alt| repair(value, alt))
            .unwrap_or_else(|| value.clone());
    }

    match (value, declared_type(schema)) {
        (Value::Array(items), Some("object")) if items.len() == 1 => repair(&items[0], schema),
        (Value::Object(map), _) => Value::Object(repair_object(map, schema)),
        (Value::Array(items), _) => match schema.get("items") {
            Some(item_schema) => Value::Array(items.iter().map(|v| repair(v, item_schema)).collect()),
            None => value.clone(),
        },
        (Value::String(s), _) => repair_string(s, schema),
        _ => value.clone(),
    }
}

fn repair_object(map: &Map<String, Value>, schema: &Value) -> Map<String, Value> {
    let properties = schema.get("properties").and_then(Value::as_object);
    let additional = schema.get("additionalProperties").filter(|v| v.is_object());

    let mut out = Map::new();
    for (key, value) in map {
        let key = match properties {
            Some(props) if !props.contains_key(key) => props
                .keys()
                .find(|p| !map.contains_key(*p) && normalize_key(p) == normalize_key(key))
                .cloned()
                .unwrap_or_else(|| key.clone()),
            _ => key.clone(),
        };

        let property_schema = properties
            .and_then(|props| props.get(&key))
            .or(additional);
        let value = match property_schema {
            Some(s) => repair(value, s),
            None => value.clone(),
        };
        out.insert(key, value);
    }
    out
}

fn repair_string(s: &str, schema: &Value) -> Value {
    let trimmed = s.trim();

    if let Some(members) = schema.get("enum").and_then(Value::as_array) {
        if let Some(member) = members
            .iter()
            .filter_map(Value::as_str)
            .find(|m| m.eq_ignore_ascii_case(trimmed))
        {
            return Value::String(member.to_string());
        }
    }

    let wants_bool = declared_type(schema) == Some("boolean")
        || schema.get("const").is_some_and(Value::is_boolean);
    if wants_bool {
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
    }

    match declared_type(schema) {
        Some("integer") => {
            if let Ok(n) = trimmed.parse::<i64>() {
                return Value::from(n);
            }
        }
        Some("number") => {
            if let Ok(n) = trimmed.parse::<i64>() {
                return Value::from(n);
            }
            if let Some(n) = trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                return Value::Number(n);
            }
        }
        _ => {}
    }

    Value::String(trimmed.to_string())
}

fn declared_type(schema: &Value) -> Option<&str> {
    schema.get("type").and_then(Value::as_str)
}

fn type_fits(value: &Value, schema: &Value) -> bool {
    match declared_type(schema) {
        Some("object") => value.is_object(),
        Some("array") => value.is_array(),
        Some("string") => value.is_string(),
        _ => true,
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}
