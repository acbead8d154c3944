use std::collections::BTreeSet;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use formsmith::form::FieldValue;
use formsmith::options::OptionsDocument;
use formsmith::validate::{format_errors, validate_document, validate_value, ValidationContext};
use formsmith::{FormSession, OptionsLoad};

fn codes(root: &Value, data: &Value) -> Vec<&'static str> {
    let options = OptionsDocument::default();
    let ctx = ValidationContext::new(root, &options);
    validate_document(data, &ctx, &BTreeSet::new())
        .errors
        .into_iter()
        .map(|e| e.code)
        .collect()
}

#[test]
fn custom_options_replace_the_schema_enum() {
    let root = json!({
        "type": "object",
        "properties": { "grade": { "type": "string", "enum": ["A", "B", "C"] } }
    });
    let options = OptionsDocument::from_value(&json!({ "grade": { "values": ["A", "B"] } })).expect("options");
    let ctx = ValidationContext::new(&root, &options);

    let result = validate_document(&json!({ "grade": "C" }), &ctx, &BTreeSet::new());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code, "V501");
    assert_eq!(result.errors[0].path, "grade");

    assert!(validate_document(&json!({ "grade": "B" }), &ctx, &BTreeSet::new()).is_valid());
}

#[test]
fn session_validation_uses_current_options() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "properties": { "grade": { "type": "string", "enum": ["A", "B", "C"] } }
    }));
    session
        .load_options(&json!({ "grade": { "values": ["A", "B"] } }), OptionsLoad::Strict)
        .expect("options load");
    session.populate(&json!({ "grade": "C" }));
    assert_eq!(session.invalid_fields(), vec!["grade".to_string()]);

    session.toggle_option("grade", "B").expect("toggle");
    assert!(session.validate().is_valid());
}

#[test]
fn errors_are_grouped_by_top_level_section() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "required": ["name", "address"],
        "properties": {
            "name": { "type": "string" },
            "address": {
                "type": "object",
                "required": ["street", "zip"],
                "properties": {
                    "street": { "type": "string" },
                    "zip": { "type": "string", "pattern": "^[0-9]{5}$" }
                }
            }
        }
    }));
    session.set_value("address.zip", FieldValue::Text("abc".into())).expect("set");
    let result = session.validate();

    assert!(!result.is_valid());
    assert_eq!(result.by_section["name"].len(), 1);
    assert_eq!(result.by_section["name"][0].code, "V101");
    let address: Vec<&str> = result.by_section["address"].iter().map(|e| e.code).collect();
    assert_eq!(address, vec!["V101", "V403"]);
}

#[test]
fn blank_text_counts_as_missing() {
    let root = json!({ "type": "object", "required": ["name"], "properties": { "name": { "type": "string" } } });
    assert_eq!(codes(&root, &json!({ "name": "   " })), vec!["V101"]);
    assert!(codes(&root, &json!({ "name": "Ada" })).is_empty());
}

#[test]
fn type_and_bound_violations() {
    let root = json!({
        "type": "object",
        "properties": {
            "age": { "type": "integer", "minimum": 0, "maximum": 130 },
            "score": { "type": "number", "exclusiveMaximum": 10, "multipleOf": 0.5 },
            "ok": { "type": "boolean" }
        }
    });
    assert_eq!(codes(&root, &json!({ "age": "old" })), vec!["V201"]);
    assert_eq!(codes(&root, &json!({ "age": -1 })), vec!["V301"]);
    assert_eq!(codes(&root, &json!({ "age": 200 })), vec!["V302"]);
    assert_eq!(codes(&root, &json!({ "score": 10 })), vec!["V303"]);
    assert_eq!(codes(&root, &json!({ "score": 2.25 })), vec!["V304"]);
    assert_eq!(codes(&root, &json!({ "ok": "yes" })), vec!["V201"]);
    assert!(codes(&root, &json!({ "age": 30, "score": 9.5, "ok": true })).is_empty());
}

#[test]
fn string_lengths_and_formats() {
    let root = json!({
        "type": "object",
        "properties": {
            "code": { "type": "string", "minLength": 2, "maxLength": 4 },
            "born": { "type": "string", "format": "date" },
            "seen": { "type": "string", "format": "date-time" },
            "mail": { "type": "string", "format": "email" }
        }
    });
    assert_eq!(codes(&root, &json!({ "code": "x" })), vec!["V401"]);
    assert_eq!(codes(&root, &json!({ "code": "abcde" })), vec!["V402"]);
    assert_eq!(codes(&root, &json!({ "born": "2023-02-30" })), vec!["V404"]);
    assert_eq!(codes(&root, &json!({ "mail": "not-an-address" })), vec!["V404"]);
    assert_eq!(codes(&root, &json!({ "seen": "yesterday" })), vec!["V404"]);
    assert!(codes(
        &root,
        &json!({ "born": "2024-02-29", "mail": "a@b.org", "seen": "2024-01-01T10:00:00Z" })
    )
    .is_empty());
}

#[test]
fn array_constraints() {
    let root = json!({
        "type": "object",
        "properties": {
            "tags": { "type": "array", "minItems": 2, "maxItems": 3, "uniqueItems": true, "items": { "type": "string" } }
        }
    });
    assert_eq!(codes(&root, &json!({ "tags": ["a"] })), vec!["V601"]);
    assert_eq!(codes(&root, &json!({ "tags": ["a", "b", "c", "d"] })), vec!["V602"]);
    assert_eq!(codes(&root, &json!({ "tags": ["a", "a"] })), vec!["V603"]);
    assert_eq!(codes(&root, &json!({ "tags": ["a", 1] })), vec!["V201"]);
}

#[test]
fn value_must_match_some_variant() {
    let root = json!({
        "type": "object",
        "properties": { "id": { "oneOf": [{ "type": "string" }, { "type": "integer" }] } }
    });
    assert_eq!(codes(&root, &json!({ "id": true })), vec!["V701"]);
    assert!(codes(&root, &json!({ "id": 7 })).is_empty());
    assert!(codes(&root, &json!({ "id": "x" })).is_empty());
}

#[test]
fn references_are_followed_during_validation() {
    let root = json!({
        "type": "object",
        "$defs": { "Age": { "type": "integer", "minimum": 18 } },
        "properties": { "age": { "$ref": "#/$defs/Age" }, "other": { "$ref": "#/$defs/Missing" } }
    });
    assert_eq!(codes(&root, &json!({ "age": 12 })), vec!["V301"]);
    assert!(codes(&root, &json!({ "other": "anything" })).is_empty());
}

#[test]
fn single_value_validation_skips_required() {
    let root = json!({});
    let options = OptionsDocument::default();
    let ctx = ValidationContext::new(&root, &options);
    let fragment = json!({ "type": "object", "required": ["a"], "properties": { "a": { "type": "string" } } });
    assert!(validate_value(&json!({}), &fragment, "thing", &ctx).is_valid);
    let result = validate_value(&json!({ "a": 1 }), &fragment, "thing", &ctx);
    assert_eq!(result.errors[0].path, "thing.a");
}

#[test]
fn formatted_errors_name_code_and_path() {
    let root = json!({ "type": "object", "required": ["name"] });
    let options = OptionsDocument::default();
    let ctx = ValidationContext::new(&root, &options);
    let result = validate_document(&json!({}), &ctx, &BTreeSet::new());
    assert_eq!(format_errors(&result.errors), "V101: name: required value is missing");
}
