use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use formsmith::collect::{classify, infer_variant, value_at, CollectedKind};
use formsmith::form::FieldValue;
use formsmith::FormSession;

fn profile_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "age": { "type": "integer" },
            "height": { "type": "number" },
            "member": { "type": "boolean" },
            "joined": { "type": "string", "format": "date" },
            "tier": { "type": "string", "enum": ["silver", "gold"] },
            "tags": { "type": "array", "items": { "type": "string" } }
        }
    })
}

#[test]
fn primitive_form_round_trips() {
    let data = json!({
        "name": "Ada",
        "age": 36,
        "height": 1.7,
        "member": true,
        "joined": "2020-05-01",
        "tier": "gold",
        "tags": ["a", "b"]
    });
    let mut session = FormSession::new(profile_schema());
    let report = session.populate(&data);
    assert!(report.invalid.is_empty());
    assert!(report.unmatched.is_empty());
    assert_eq!(session.collect_data(), data);
}

#[test]
fn each_control_collects_through_one_kind() {
    let session = FormSession::new(profile_schema());
    let kind = |path: &str| classify(session.tree.field(path).expect("field"));
    assert_eq!(kind("name"), CollectedKind::PlainText);
    assert_eq!(kind("age"), CollectedKind::Number);
    assert_eq!(kind("member"), CollectedKind::BooleanCheckbox);
    assert_eq!(kind("joined"), CollectedKind::Date);
    assert_eq!(kind("tier"), CollectedKind::PlainText);
    assert_eq!(kind("tags"), CollectedKind::CommaTextarea);
}

#[test]
fn empty_fields_are_left_out() {
    let mut session = FormSession::new(profile_schema());
    session.set_value("name", FieldValue::Text("  ".into())).expect("set");
    assert_eq!(session.collect_data(), json!({}));
}

#[test]
fn loaded_empty_strings_survive_collection() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "properties": { "a": { "type": "string" }, "b": { "type": "string" } }
    }));
    let data = json!({ "a": "", "b": "x" });
    let report = session.populate(&data);
    assert_eq!(report.applied, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(session.collect_data(), data);
}

#[test]
fn unparseable_number_is_kept_as_text() {
    let mut session = FormSession::new(profile_schema());
    session.set_value("age", FieldValue::Text("abc".into())).expect("set");
    let data = session.collect_data();
    assert_eq!(data["age"], json!("abc"));
    let result = session.validate_field("age").expect("field");
    assert!(!result.is_valid);
    assert_eq!(result.errors[0].code, "V201");
}

fn polymorphic_schema() -> Value {
    json!({
        "oneOf": [
            {
                "title": "SchemaX",
                "type": "object",
                "required": ["foo"],
                "properties": { "foo": { "type": "string" } }
            },
            {
                "title": "SchemaY",
                "type": "object",
                "required": ["bar"],
                "properties": { "bar": { "type": "integer" } }
            }
        ]
    })
}

#[test]
fn loaded_data_selects_the_matching_branch() {
    let mut session = FormSession::new(polymorphic_schema());
    assert!(session.tree.field("bar").is_none());

    let report = session.populate(&json!({ "bar": 1 }));
    assert_eq!(report.variants, vec![(String::new(), "SchemaY".to_string())]);
    assert!(session.tree.field("foo").is_none());
    assert_eq!(session.collect_data(), json!({ "bar": 1 }));
}

#[test]
fn variant_inference_respects_const_and_closed_objects() {
    let root = json!({});
    let candidates = vec![
        json!({ "type": "object", "properties": { "kind": { "const": "cat" }, "lives": { "type": "integer" } } }),
        json!({ "type": "object", "properties": { "kind": { "const": "dog" } } }),
        json!({ "type": "object", "additionalProperties": false, "properties": { "name": { "type": "string" } } }),
    ];
    assert_eq!(infer_variant(&json!({ "kind": "dog" }), &candidates, &root), Some(1));
    assert_eq!(infer_variant(&json!({ "kind": "cat", "lives": 9 }), &candidates, &root), Some(0));
    assert_eq!(infer_variant(&json!({ "name": "x", "extra": 1 }), &candidates[2..], &root), None);
    assert_eq!(infer_variant(&json!("text"), &[json!({ "type": "integer" }), json!({ "type": "string" })], &root), Some(1));
}

#[test]
fn nested_branches_are_inferred_level_by_level() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "properties": {
            "shape": {
                "oneOf": [
                    {
                        "title": "Circle",
                        "type": "object",
                        "required": ["radius"],
                        "properties": { "radius": { "type": "number" } }
                    },
                    {
                        "title": "Poly",
                        "type": "object",
                        "properties": { "name": { "type": "string" } },
                        "oneOf": [
                            {
                                "title": "Tri",
                                "properties": { "kind": { "type": "string", "const": "t" }, "a": { "type": "integer" } }
                            },
                            {
                                "title": "Quad",
                                "properties": { "kind": { "type": "string", "const": "k" }, "q": { "type": "integer" } }
                            }
                        ]
                    }
                ]
            }
        }
    }));
    let data = json!({ "shape": { "name": "box", "kind": "k", "q": 4 } });
    let report = session.populate(&data);
    assert_eq!(
        report.variants,
        vec![
            ("shape".to_string(), "Poly".to_string()),
            ("shape".to_string(), "Quad".to_string()),
        ]
    );
    assert!(session.tree.field("shape.radius").is_none());
    assert!(session.tree.field("shape.a").is_none());
    assert!(report.unmatched.is_empty());
    assert_eq!(session.collect_data(), data);
}

#[test]
fn recursive_rule_tree_populates_every_level() {
    let mut session = FormSession::new(json!({
        "oneOf": [
            {
                "title": "Rule",
                "type": "object",
                "required": ["field"],
                "properties": { "field": { "type": "string" }, "equals": { "type": "string" } }
            },
            {
                "title": "Group",
                "type": "object",
                "required": ["op", "rules"],
                "properties": {
                    "op": { "type": "string", "enum": ["and", "or"] },
                    "rules": { "type": "array", "items": { "$ref": "#" } }
                }
            }
        ]
    }));
    let data = json!({
        "op": "and",
        "rules": [
            { "field": "a", "equals": "1" },
            {
                "op": "or",
                "rules": [
                    { "field": "b", "equals": "2" },
                    { "field": "c", "equals": "3" }
                ]
            }
        ]
    });
    let report = session.populate(&data);
    let chosen: Vec<(&str, &str)> = report.variants.iter().map(|(p, t)| (p.as_str(), t.as_str())).collect();
    assert_eq!(
        chosen,
        vec![
            ("", "Group"),
            ("rules.0", "Rule"),
            ("rules.1", "Group"),
            ("rules.1.rules.0", "Rule"),
            ("rules.1.rules.1", "Rule"),
        ]
    );
    assert!(report.invalid.is_empty());
    assert!(report.unmatched.is_empty());
    assert_eq!(session.collect_data(), data);
}

fn people_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "people": {
                "type": "array",
                "items": { "type": "object", "properties": { "name": { "type": "string" } } }
            }
        }
    })
}

#[test]
fn removing_an_item_compacts_indices() {
    let mut session = FormSession::new(people_schema());
    for _ in 0..3 {
        session.add_array_item("people").expect("add");
    }
    for (idx, name) in ["A", "B", "C"].iter().enumerate() {
        session
            .set_value(&format!("people.{idx}.name"), FieldValue::Text(name.to_string()))
            .expect("set");
    }

    session.remove_array_item("people", 1).expect("remove");
    assert!(session.tree.field("people.2.name").is_none());
    assert_eq!(
        session.tree.field("people.1.name").expect("moved").value,
        FieldValue::Text("C".into())
    );
    let moved = session.tree.find("people.1").expect("item node");
    assert_eq!(session.tree.node(moved).expect("node").label, "Item 2");
    assert_eq!(session.collect_data(), json!({ "people": [{ "name": "A" }, { "name": "C" }] }));

    assert!(session.remove_array_item("people", 5).is_err());
}

#[test]
fn populate_sizes_arrays_to_the_data() {
    let mut session = FormSession::new(people_schema());
    session.add_array_item("people").expect("add");
    session.add_array_item("people").expect("add");
    session.add_array_item("people").expect("add");

    session.populate(&json!({ "people": [{ "name": "X" }, { "name": "Y" }] }));
    assert_eq!(session.tree.array("people").expect("array").items.len(), 2);
    assert_eq!(session.collect_data(), json!({ "people": [{ "name": "X" }, { "name": "Y" }] }));
}

#[test]
fn empty_items_still_occupy_their_slot() {
    let mut session = FormSession::new(people_schema());
    session.add_array_item("people").expect("add");
    let data = session.collect_data();
    assert_eq!(value_at(&data, "people.0"), Some(&json!({})));
}

#[test]
fn export_is_pretty_json_of_the_collected_data() {
    let mut session = FormSession::new(profile_schema());
    session.set_value("name", FieldValue::Text("Ada".into())).expect("set");
    let text = session.export_json().expect("export");
    let parsed: Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(parsed, json!({ "name": "Ada" }));
    assert!(text.contains('\n'));
}

#[test]
fn values_without_a_control_are_reported() {
    let mut session = FormSession::new(profile_schema());
    let report = session.populate(&json!({ "name": "Ada", "unknown": 3 }));
    assert_eq!(report.unmatched, vec!["unknown".to_string()]);
    assert_eq!(report.applied, vec!["name".to_string()]);
}
