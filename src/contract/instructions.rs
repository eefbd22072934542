//! Render a schema as prompt text.

use std::fmt::Write as _;

use serde_json::{json, Map, Value};

/// Options for [`super::ResponseContract::generate_instructions`].
#[derive(Debug, Clone, Default)]
pub struct InstructionOptions {
    /// Append a skeleton JSON example built from the schema.
    pub include_example: bool,
    /// Text placed before the structure description.
    pub preamble: Option<String>,
}

impl InstructionOptions {
    pub fn with_example(mut self) -> Self {
        self.include_example = true;
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }
}

pub(crate) fn generate(schema: &Value, options: &InstructionOptions) -> String {
    let mut out = String::new();
    if let Some(preamble) = &options.preamble {
        out.push_str(preamble.trim_end());
        out.push_str("\n\n");
    }

    out.push_str("Respond with ONLY a JSON value (no markdown fences, no commentary).\n");

    match schema.get("anyOf").or_else(|| schema.get("oneOf")).and_then(Value::as_array) {
        Some(alts) => {
            out.push_str("It must take exactly one of the following forms:\n");
            for (i, alt) in alts.iter().enumerate() {
                let _ = writeln!(out, "\nForm {}:", i + 1);
                describe(alt, 0, &mut out);
            }
        }
        None => {
            out.push_str("It must match this structure:\n");
            describe(schema, 0, &mut out);
        }
    }

    if options.include_example {
        let example = example_for(schema);
        let rendered = serde_json::to_string_pretty(&example).unwrap_or_else(|_| example.to_string());
        let _ = write!(out, "\nExample:\n{}\n", rendered);
    }

    out
}

fn describe(schema: &Value, indent: usize, out: &mut String) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        let pad = "  ".repeat(indent);
        let _ = writeln!(out, "{}- a JSON {}", pad, type_label(schema));
        return;
    };
    let required = required_set(schema);

    for (name, prop) in properties {
        let pad = "  ".repeat(indent);
        let requirement = if required.contains(&name.as_str()) {
            "required"
        } else {
            "optional"
        };
        let _ = write!(out, "{}- \"{}\" ({}, {})", pad, name, type_label(prop), requirement);
        if let Some(constraint) = constraint_text(prop) {
            let _ = write!(out, ": {}", constraint);
        }
        if let Some(desc) = prop.get("description").and_then(Value::as_str) {
            let _ = write!(out, ". {}", desc);
        }
        out.push('\n');

        if let Some(items) = prop.get("items").filter(|i| i.get("properties").is_some()) {
            let _ = writeln!(out, "{}  each item has:", pad);
            describe(items, indent + 2, out);
        } else if prop.get("properties").is_some() {
            describe(prop, indent + 1, out);
        }
    }
}

fn required_set(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn type_label(schema: &Value) -> String {
    if let Some(c) = schema.get("const") {
        return format!("always {}", c);
    }
    match schema.get("type") {
        Some(Value::String(t)) if t == "array" => {
            let item = schema.get("items").map(type_label).unwrap_or_else(|| "any".into());
            format!("array of {}", item)
        }
        Some(Value::String(t)) if t == "object" && schema.get("additionalProperties").is_some_and(Value::is_object) => {
            let inner = schema
                .get("additionalProperties")
                .map(type_label)
                .unwrap_or_else(|| "any".into());
            format!("object mapping names to {}", inner)
        }
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(ts)) => ts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        _ => "any".to_string(),
    }
}

fn constraint_text(schema: &Value) -> Option<String> {
    if let Some(members) = schema.get("enum").and_then(Value::as_array) {
        let members: Vec<String> = members.iter().map(Value::to_string).collect();
        return Some(format!("one of {}", members.join(", ")));
    }
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        return Some(format!("at least {} item(s)", min));
    }
    None
}

fn example_for(schema: &Value) -> Value {
    if let Some(first) = schema
        .get("anyOf")
        .or_else(|| schema.get("oneOf"))
        .and_then(Value::as_array)
        .and_then(|a| a.first())
    {
        return example_for(first);
    }
    if let Some(c) = schema.get("const") {
        return c.clone();
    }
    if let Some(first) = schema.get("enum").and_then(Value::as_array).and_then(|a| a.first()) {
        return first.clone();
    }
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let mut map = Map::new();
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (name, prop) in props {
                    map.insert(name.clone(), example_for(prop));
                }
            }
            Value::Object(map)
        }
        Some("array") => json!([schema.get("items").map(example_for).unwrap_or(Value::Null)]),
        Some("string") => json!("..."),
        Some("integer") | Some("number") => json!(0),
        Some("boolean") => json!(true),
        _ => Value::Null,
    }
}
