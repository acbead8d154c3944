use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use formsmith::form::{ControlKind, FieldValue, NodeKind};
use formsmith::{FormSession, OptionsLoad, SessionSettings};

fn warning_at(session: &FormSession, path: &str) -> Option<String> {
    let id = session.tree.find(path)?;
    match &session.tree.node(id)?.kind {
        NodeKind::Warning { message } => Some(message.clone()),
        _ => None,
    }
}

fn tree_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "children": { "type": "array", "items": { "$ref": "#" } }
        }
    })
}

#[test]
fn recursive_items_expand_the_root_properties() {
    let mut session = FormSession::new(tree_schema());
    assert!(session.tree.array("children").is_some());

    session.add_array_item("children").expect("add");
    assert!(session.tree.field("children.0.name").is_some());
    assert!(session.tree.array("children.0.children").is_some());

    session.add_array_item("children.0.children").expect("add nested");
    session
        .set_value("children.0.children.0.name", FieldValue::Text("leaf".into()))
        .expect("set");
    assert_eq!(
        session.collect_data(),
        json!({ "children": [{ "children": [{ "name": "leaf" }] }] })
    );
}

#[test]
fn recursion_stops_at_the_configured_limit() {
    let settings = SessionSettings { recursion_limit: 1, ..SessionSettings::default() };
    let mut session = FormSession::with_settings(tree_schema(), settings);
    session.add_array_item("children").expect("add");
    session.add_array_item("children.0.children").expect("placeholder still added");

    let message = warning_at(&session, "children.0.children.0").expect("warning node");
    assert!(message.contains("1 levels"), "{message}");
    assert!(session.tree.field("children.0.children.0.name").is_none());
}

#[test]
fn self_reference_outside_arrays_renders_a_placeholder() {
    let session = FormSession::new(json!({
        "type": "object",
        "$defs": {
            "Node": {
                "type": "object",
                "properties": {
                    "value": { "type": "string" },
                    "next": { "$ref": "#/$defs/Node" }
                }
            }
        },
        "properties": { "head": { "$ref": "#/$defs/Node" } }
    }));
    assert!(session.tree.field("head.value").is_some());
    let message = warning_at(&session, "head.next").expect("warning node");
    assert!(message.contains("#/$defs/Node"));
}

#[test]
fn unresolved_reference_renders_a_placeholder() {
    let session = FormSession::new(json!({
        "type": "object",
        "properties": {
            "ok": { "type": "string" },
            "broken": { "$ref": "#/$defs/Missing" }
        }
    }));
    assert!(session.tree.field("ok").is_some());
    let message = warning_at(&session, "broken").expect("warning node");
    assert_eq!(message, "unresolved reference #/$defs/Missing");
}

#[test]
fn controls_follow_schema_and_options() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "properties": {
            "score": { "type": "integer" },
            "color": { "type": "string" },
            "size": { "type": "string" },
            "flag": { "type": "boolean" },
            "tags": { "type": "array", "items": { "type": "string", "enum": ["a", "b"] } },
            "born": { "type": "string", "format": "date" },
            "seen": { "type": "string", "format": "date-time" },
            "bio": { "type": "string", "maxLength": 500 },
            "count": { "type": "number", "minimum": 0 }
        }
    }));
    session
        .load_options(
            &json!({
                "score": { "values": [], "input_control": "slider", "min": 1, "max": 5 },
                "color": { "values": ["red", "blue"], "input_control": "radio" },
                "size": { "values": ["S", "M"], "input_control": "sparkles" }
            }),
            OptionsLoad::Strict,
        )
        .expect("options load");
    session.render_all_tabs();

    let control = |path: &str| session.tree.field(path).expect("field").control.clone();
    assert_eq!(control("score"), ControlKind::Slider { min: 1.0, max: 5.0, step: 1.0 });
    assert_eq!(control("color"), ControlKind::RadioGroup);
    assert_eq!(control("size"), ControlKind::Dropdown);
    assert_eq!(control("flag"), ControlKind::Checkbox);
    assert_eq!(control("tags"), ControlKind::MultiSelect);
    assert_eq!(control("born"), ControlKind::Date);
    assert_eq!(control("seen"), ControlKind::DateTime);
    assert_eq!(control("bio"), ControlKind::TextArea { comma_list: false });
    assert_eq!(control("count"), ControlKind::Number { integer: false, minimum: Some(0.0), maximum: None });

    let tags: Vec<String> = session.tree.field("tags").expect("tags").options.iter().map(|o| o.value.clone()).collect();
    assert_eq!(tags, vec!["a", "b"]);
}

#[test]
fn defaults_prefill_controls() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "properties": {
            "country": { "type": "string", "default": "CA" },
            "subscribe": { "type": "boolean", "default": true }
        }
    }));
    assert_eq!(session.collect_data(), json!({ "country": "CA", "subscribe": true }));
}

fn pet_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "pet": {
                "oneOf": [
                    {
                        "title": "Cat",
                        "type": "object",
                        "properties": { "lives": { "type": "integer" } },
                        "oneOf": [
                            { "title": "Indoor", "properties": { "room": { "type": "string" } } },
                            { "title": "Outdoor", "properties": { "yard": { "type": "string" } } }
                        ]
                    },
                    { "title": "Dog", "type": "object", "properties": { "breed": { "type": "string" } } }
                ]
            }
        }
    })
}

#[test]
fn switching_branches_replaces_their_content() {
    let mut session = FormSession::new(pet_schema());
    assert!(session.tree.field("pet.lives").is_none());

    let receipt = session.select_variant("pet", 0).expect("select cat");
    assert_eq!(receipt.fields, vec!["pet.lives".to_string()]);

    let selectors = session.tree.selectors("pet");
    assert_eq!(selectors.len(), 2);
    let nested = session.tree.selector_at(selectors[1]).expect("nested selector");
    assert_eq!(nested.level, 1);
    let titles: Vec<&str> = nested.variants.iter().map(|v| v.title.as_str()).collect();
    assert_eq!(titles, vec!["Indoor", "Outdoor"]);

    session.select_variant_at(selectors[1], 1).expect("select outdoor");
    assert!(session.tree.field("pet.yard").is_some());

    session.select_variant("pet", 1).expect("select dog");
    assert!(session.tree.field("pet.lives").is_none());
    assert!(session.tree.field("pet.yard").is_none());
    assert!(session.tree.field("pet.breed").is_some());
    assert_eq!(session.tree.selectors("pet").len(), 1);

    assert!(session.select_variant("pet", 9).is_err());
}

#[test]
fn sole_variant_is_selected_automatically() {
    let session = FormSession::new(json!({
        "type": "object",
        "properties": {
            "only": { "oneOf": [{ "type": "object", "properties": { "a": { "type": "string" } } }] }
        }
    }));
    assert!(session.tree.field("only.a").is_some());
    let selector = session.tree.selectors("only")[0];
    assert_eq!(session.tree.selector_at(selector).expect("selector").selected, Some(0));
}

#[test]
fn all_of_parts_contribute_properties() {
    let session = FormSession::new(json!({
        "type": "object",
        "$defs": { "Extra": { "type": "object", "properties": { "b": { "type": "string" } } } },
        "properties": {
            "person": {
                "type": "object",
                "properties": { "a": { "type": "string" } },
                "allOf": [{ "$ref": "#/$defs/Extra" }]
            }
        }
    }));
    assert_eq!(session.tree.field_paths(), vec!["person.a".to_string(), "person.b".to_string()]);
}
