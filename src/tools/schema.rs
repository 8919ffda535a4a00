//! Parameter schemas in the Live API's OpenAPI subset (upper-case type names).

use serde_json::{Map, Value, json};

pub fn string(description: &str) -> Value {
    json!({ "type": "STRING", "description": description })
}

pub fn string_enum(description: &str, values: &[&str]) -> Value {
    json!({ "type": "STRING", "description": description, "enum": values })
}

/// An object schema; `required` names must appear in `properties`.
pub fn object(properties: &[(&str, Value)], required: &[&str]) -> Value {
    let props: Map<String, Value> = properties
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    let mut schema = json!({ "type": "OBJECT", "properties": props });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

/// Schema for tools that take no arguments.
pub fn empty() -> Value {
    Value::Null
}

/// prompt / aspectRatio / resolution / format, all optional.
pub fn output_settings() -> Vec<(&'static str, Value)> {
    vec![
        ("prompt", string("Text prompt describing the desired result")),
        ("aspectRatio", string("Aspect ratio such as 1:1, 16:9 or 9:16")),
        ("resolution", string("Output resolution such as 1K, 2K or 4K")),
        ("format", string("Output file format such as PNG or JPEG")),
    ]
}
