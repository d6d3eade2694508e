// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Mutation Generator
//!
//! Expands a JSON-Schema-shaped tool input declaration into a finite,
//! deterministic sequence of test inputs: one valid control, then typed
//! perturbations per declared property, then a single extra-field variant.
//! The sequence length is linear in the property count and its ordering is
//! stable, so a sweep is reproducible run over run.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Closed set of mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Valid,
    MissingRequired,
    WrongType,
    NullValue,
    EmptyValue,
    Boundary,
    ExtraField,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::MissingRequired => "missing_required",
            Self::WrongType => "wrong_type",
            Self::NullValue => "null_value",
            Self::EmptyValue => "empty_value",
            Self::Boundary => "boundary",
            Self::ExtraField => "extra_field",
        }
    }
}

/// One generated test input for a stress probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub kind: MutationKind,
    /// Property the perturbation targets; `None` for whole-object variants.
    pub field: Option<String>,
    pub description: String,
    pub arguments: Value,
}

const LONG_STRING_LEN: usize = 10_000;
const PATH_TRAVERSAL: &str = "../../../etc/passwd";
const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991; // 2^53 - 1

fn default_for_type(ty: &str) -> Value {
    match ty {
        "string" => json!("test_value"),
        "integer" | "number" => json!(42),
        "boolean" => json!(true),
        "array" => json!([]),
        "object" => json!({}),
        _ => json!("test_value"),
    }
}

/// A canonical value of a different type, for type-swap variants.
fn foreign_for_type(ty: &str) -> Value {
    match ty {
        "string" => json!(12345),
        "integer" | "number" => json!("not_a_number"),
        "boolean" => json!("not_a_bool"),
        "array" => json!("not_an_array"),
        "object" => json!("not_an_object"),
        _ => json!(12345),
    }
}

fn property_type(schema: &Value) -> &str {
    schema.get("type").and_then(Value::as_str).unwrap_or("string")
}

fn valid_arguments(properties: &Map<String, Value>) -> Value {
    let mut args = Map::new();
    for (name, prop) in properties {
        args.insert(name.clone(), default_for_type(property_type(prop)));
    }
    Value::Object(args)
}

fn with_field(base: &Value, field: &str, value: Value) -> Value {
    let mut obj = base.as_object().cloned().unwrap_or_default();
    obj.insert(field.to_string(), value);
    Value::Object(obj)
}

fn without_field(base: &Value, field: &str) -> Value {
    let mut obj = base.as_object().cloned().unwrap_or_default();
    obj.remove(field);
    Value::Object(obj)
}

/// Expand `input_schema` into the ordered mutation list.
///
/// A schema with zero declared properties yields exactly two mutations: the
/// valid control and the extra-field variant.
pub fn generate_mutations(input_schema: &Value) -> Vec<Mutation> {
    let empty = Map::new();
    let properties = input_schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let required: Vec<&str> = input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let valid = valid_arguments(properties);
    let mut mutations = vec![Mutation {
        kind: MutationKind::Valid,
        field: None,
        description: "valid control input".to_string(),
        arguments: valid.clone(),
    }];

    for (name, prop) in properties {
        let ty = property_type(prop);

        if required.contains(&name.as_str()) {
            mutations.push(Mutation {
                kind: MutationKind::MissingRequired,
                field: Some(name.clone()),
                description: format!("required field '{name}' omitted"),
                arguments: without_field(&valid, name),
            });
        }

        mutations.push(Mutation {
            kind: MutationKind::WrongType,
            field: Some(name.clone()),
            description: format!("'{name}' set to a foreign type"),
            arguments: with_field(&valid, name, foreign_for_type(ty)),
        });

        mutations.push(Mutation {
            kind: MutationKind::NullValue,
            field: Some(name.clone()),
            description: format!("'{name}' set to null"),
            arguments: with_field(&valid, name, Value::Null),
        });

        match ty {
            "string" => {
                mutations.push(Mutation {
                    kind: MutationKind::EmptyValue,
                    field: Some(name.clone()),
                    description: format!("'{name}' set to empty string"),
                    arguments: with_field(&valid, name, json!("")),
                });
                mutations.push(Mutation {
                    kind: MutationKind::Boundary,
                    field: Some(name.clone()),
                    description: format!("'{name}' set to a {LONG_STRING_LEN}-char string"),
                    arguments: with_field(&valid, name, json!("x".repeat(LONG_STRING_LEN))),
                });
                mutations.push(Mutation {
                    kind: MutationKind::Boundary,
                    field: Some(name.clone()),
                    description: format!("'{name}' set to a path traversal literal"),
                    arguments: with_field(&valid, name, json!(PATH_TRAVERSAL)),
                });
            }
            "array" => {
                mutations.push(Mutation {
                    kind: MutationKind::EmptyValue,
                    field: Some(name.clone()),
                    description: format!("'{name}' set to empty array"),
                    arguments: with_field(&valid, name, json!([])),
                });
            }
            "integer" | "number" => {
                mutations.push(Mutation {
                    kind: MutationKind::Boundary,
                    field: Some(name.clone()),
                    description: format!("'{name}' set to -1"),
                    arguments: with_field(&valid, name, json!(-1)),
                });
                mutations.push(Mutation {
                    kind: MutationKind::Boundary,
                    field: Some(name.clone()),
                    description: format!("'{name}' set to the maximum safe integer"),
                    arguments: with_field(&valid, name, json!(MAX_SAFE_INTEGER)),
                });
            }
            _ => {}
        }
    }

    mutations.push(Mutation {
        kind: MutationKind::ExtraField,
        field: Some("_unknown_field".to_string()),
        description: "unexpected extra field added".to_string(),
        arguments: with_field(&valid, "_unknown_field", json!("unexpected")),
    });

    mutations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_schema_yields_control_and_extra_field_only() {
        let mutations = generate_mutations(&json!({ "type": "object", "properties": {} }));
        assert_eq!(mutations.len(), 2);
        assert_eq!(mutations[0].kind, MutationKind::Valid);
        assert_eq!(mutations[0].arguments, json!({}));
        assert_eq!(mutations[1].kind, MutationKind::ExtraField);
        assert_eq!(
            mutations[1].arguments,
            json!({ "_unknown_field": "unexpected" })
        );
    }

    #[test]
    fn required_string_property_expands_fully() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        });
        let mutations = generate_mutations(&schema);
        let kinds: Vec<MutationKind> = mutations.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MutationKind::Valid,
                MutationKind::MissingRequired,
                MutationKind::WrongType,
                MutationKind::NullValue,
                MutationKind::EmptyValue,
                MutationKind::Boundary,
                MutationKind::Boundary,
                MutationKind::ExtraField,
            ]
        );
        assert_eq!(mutations[0].arguments, json!({ "path": "test_value" }));
        assert_eq!(mutations[1].arguments, json!({}));
        assert_eq!(mutations[2].arguments, json!({ "path": 12345 }));
        // The two boundary variants are the long string and the traversal.
        assert_eq!(
            mutations[5].arguments["path"].as_str().map(str::len),
            Some(10_000)
        );
        assert_eq!(mutations[6].arguments, json!({ "path": "../../../etc/passwd" }));
    }

    #[test]
    fn numeric_property_gets_boundary_values() {
        let schema = json!({
            "type": "object",
            "properties": { "count": { "type": "integer" } }
        });
        let mutations = generate_mutations(&schema);
        let boundaries: Vec<&Value> = mutations
            .iter()
            .filter(|m| m.kind == MutationKind::Boundary)
            .map(|m| &m.arguments["count"])
            .collect();
        assert_eq!(boundaries, vec![&json!(-1), &json!(9_007_199_254_740_991i64)]);
        // Not required, so no missing-field variant.
        assert!(!mutations
            .iter()
            .any(|m| m.kind == MutationKind::MissingRequired));
    }

    #[test]
    fn generation_is_deterministic() {
        let schema = json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "recursive": { "type": "boolean" },
                "depth": { "type": "number" }
            },
            "required": ["path"]
        });
        let a = generate_mutations(&schema);
        let b = generate_mutations(&schema);
        assert_eq!(a, b);
    }
}
