use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use formsmith::form::FieldValue;
use formsmith::{FormError, FormSession, OptionsLoad};

fn location_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "country": { "type": "string" },
            "region": { "type": "string" },
            "city": { "type": "string" }
        }
    })
}

fn location_options() -> Value {
    json!({
        "country": { "values": ["CA", "US"] },
        "region": {
            "values": [],
            "depends_on": "country",
            "dependent_values": { "CA": ["ON", "QC"], "US": ["NY", "TX"] }
        },
        "city": {
            "values": [],
            "depends_on": "region",
            "dependent_values": { "ON": ["Toronto"], "QC": ["Montreal"], "NY": ["NYC"] }
        }
    })
}

fn location_session() -> FormSession {
    let mut session = FormSession::new(location_schema());
    session.load_options(&location_options(), OptionsLoad::Strict).expect("options load");
    session
}

fn option_values(session: &FormSession, path: &str) -> Vec<String> {
    session
        .tree
        .field(path)
        .expect("field rendered")
        .options
        .iter()
        .map(|o| o.value.clone())
        .collect()
}

fn value_of(session: &FormSession, path: &str) -> FieldValue {
    session.tree.field(path).expect("field rendered").value.clone()
}

#[test]
fn trigger_change_cascades_through_dependents() {
    let mut session = location_session();
    let outcome = session.set_value("country", FieldValue::Text("CA".into())).expect("set");
    assert_eq!(outcome.recomputed, vec!["region".to_string(), "city".to_string()]);
    assert_eq!(option_values(&session, "region"), vec!["ON", "QC"]);
    assert!(option_values(&session, "city").is_empty());

    session.toggle_option("region", "ON").expect("pick region");
    assert_eq!(option_values(&session, "city"), vec!["Toronto"]);

    session.set_value("country", FieldValue::Text("US".into())).expect("set");
    assert_eq!(option_values(&session, "region"), vec!["NY", "TX"]);
    assert_eq!(value_of(&session, "region"), FieldValue::Empty);
    assert!(option_values(&session, "city").is_empty());
}

#[test]
fn recompute_is_idempotent() {
    let mut session = location_session();
    session.set_value("country", FieldValue::Text("CA".into())).expect("set");
    let first = option_values(&session, "region");
    session.set_value("country", FieldValue::Text("CA".into())).expect("set");
    assert_eq!(option_values(&session, "region"), first);
}

#[test]
fn unknown_option_is_refused() {
    let mut session = location_session();
    match session.toggle_option("country", "MX") {
        Err(FormError::UnknownOption { path, value }) => {
            assert_eq!(path, "country");
            assert_eq!(value, "MX");
        }
        other => panic!("expected UnknownOption, got {:?}", other),
    }
}

#[test]
fn invalid_loaded_value_is_restored_when_it_becomes_valid() {
    let mut session = location_session();
    let report = session.populate(&json!({ "country": "US", "region": "QC" }));
    assert_eq!(report.invalid, vec!["region".to_string()]);
    let region = session.tree.field("region").expect("region");
    assert_eq!(region.invalid, Some(vec!["QC".to_string()]));
    assert_eq!(region.value, FieldValue::Empty);

    let outcome = session.set_value("country", FieldValue::Text("CA".into())).expect("set");
    assert_eq!(outcome.restored, vec!["region".to_string()]);
    assert_eq!(value_of(&session, "region"), FieldValue::Text("QC".into()));
    assert!(!session.tree.field("region").expect("region").is_invalid());
    assert_eq!(option_values(&session, "city"), vec!["Montreal"]);
}

#[test]
fn populate_keeps_values_valid_for_the_loaded_trigger() {
    let mut session = location_session();
    let report = session.populate(&json!({ "country": "CA", "region": "QC", "city": "Montreal" }));
    assert!(report.invalid.is_empty(), "invalid: {:?}", report.invalid);
    assert_eq!(session.collect_data(), json!({ "country": "CA", "region": "QC", "city": "Montreal" }));
}

fn smoking_session() -> FormSession {
    let mut session = FormSession::new(json!({
        "type": "object",
        "required": ["brand"],
        "properties": {
            "smoker": { "type": "string", "enum": ["yes", "no"] },
            "cigarettes_per_day": { "type": "integer", "minimum": 1 },
            "brand": { "type": "string" },
            "quit_date": { "type": "string", "format": "date" }
        }
    }));
    session
        .load_options(
            &json!({
                "conditional_rules": {
                    "smoker": [{ "value": "no", "disable_fields": ["cigarettes_per_day", "brand", "quit_date"] }]
                }
            }),
            OptionsLoad::Strict,
        )
        .expect("options load");
    session
}

#[test]
fn conditional_rule_forces_sentinels() {
    let mut session = smoking_session();
    let outcome = session.set_value("smoker", FieldValue::Text("no".into())).expect("set");
    assert_eq!(outcome.disabled, vec!["cigarettes_per_day", "brand", "quit_date"]);

    let data = session.collect_data();
    assert_eq!(data["cigarettes_per_day"], json!(-9999));
    assert_eq!(data["brand"], json!("N/A"));
    assert_eq!(data["quit_date"], json!("1900-01-01"));

    let brand = session.tree.field("brand").expect("brand");
    assert!(brand.disabled && brand.auto_disabled);
    assert!(matches!(
        session.set_value("brand", FieldValue::Text("Acme".into())),
        Err(FormError::FieldDisabled(_))
    ));
    assert!(session.validate().is_valid());
}

#[test]
fn rule_release_reenables_and_keeps_the_value() {
    let mut session = smoking_session();
    session.set_value("smoker", FieldValue::Text("no".into())).expect("set");
    let outcome = session.set_value("smoker", FieldValue::Text("yes".into())).expect("set");
    assert_eq!(outcome.enabled, vec!["cigarettes_per_day", "brand", "quit_date"]);

    let brand = session.tree.field("brand").expect("brand");
    assert!(!brand.disabled && !brand.auto_disabled);
    assert_eq!(brand.value, FieldValue::Text("N/A".into()));
    session.set_value("brand", FieldValue::Text("Acme".into())).expect("editable again");
}

#[test]
fn rules_are_rechecked_after_each_edit() {
    let mut session = smoking_session();
    session.set_value("smoker", FieldValue::Text("no".into())).expect("set");
    let outcome = session.set_value("smoker", FieldValue::Text("no".into())).expect("set");
    assert!(outcome.disabled.is_empty());
    assert!(outcome.enabled.is_empty());
    assert_eq!(value_of(&session, "cigarettes_per_day"), FieldValue::Text("-9999".into()));
}

#[test]
fn dependent_on_unrendered_tab_initializes_on_activation() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "$defs": {
            "Site": {
                "type": "object",
                "properties": { "region": { "type": "string" }, "notes": { "type": "string" } }
            }
        },
        "properties": {
            "country": { "type": "string" },
            "p1": { "type": "string" },
            "p2": { "type": "string" },
            "p3": { "type": "string" },
            "p4": { "type": "string" },
            "site": { "$ref": "#/$defs/Site" }
        }
    }));
    session
        .load_options(
            &json!({
                "country": { "values": ["CA", "US"] },
                "region": {
                    "values": [],
                    "depends_on": "country",
                    "dependent_values": { "CA": ["ON", "QC"], "US": ["NY"] }
                }
            }),
            OptionsLoad::Strict,
        )
        .expect("options load");
    assert!(!session.tabs.is_empty());

    let outcome = session.set_value("country", FieldValue::Text("CA".into())).expect("set");
    assert_eq!(outcome.deferred, vec!["region".to_string()]);
    assert!(session.pending_inits.contains_key("region"));

    let receipt = session.activate_tab("site").expect("tab");
    assert_eq!(receipt.initialized, vec!["site.region".to_string()]);
    assert_eq!(option_values(&session, "site.region"), vec!["ON", "QC"]);
    assert!(session.pending_inits.is_empty());
}

#[test]
fn exclusive_value_clears_other_selections() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "properties": { "symptoms": { "type": "array", "items": { "type": "string" } } }
    }));
    session
        .load_options(
            &json!({
                "symptoms": {
                    "values": ["fever", "cough", "none"],
                    "input_control": "checkboxes",
                    "exclusive_values": ["none"]
                }
            }),
            OptionsLoad::Strict,
        )
        .expect("options load");

    session.toggle_option("symptoms", "fever").expect("toggle");
    session.toggle_option("symptoms", "cough").expect("toggle");
    assert_eq!(value_of(&session, "symptoms"), FieldValue::Multi(vec!["fever".into(), "cough".into()]));

    session.toggle_option("symptoms", "none").expect("toggle");
    assert_eq!(value_of(&session, "symptoms"), FieldValue::Multi(vec!["none".into()]));

    session.toggle_option("symptoms", "fever").expect("toggle");
    assert_eq!(session.collect_data(), json!({ "symptoms": ["fever"] }));

    session
        .set_value("symptoms", FieldValue::Multi(vec!["fever".into(), "none".into(), "cough".into()]))
        .expect("set");
    assert_eq!(value_of(&session, "symptoms"), FieldValue::Multi(vec!["cough".into()]));
}

#[test]
fn na_option_collects_as_its_value() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "properties": { "allergy": { "type": "string" } }
    }));
    session
        .load_options(
            &json!({ "allergy": { "values": ["peanut", "dust"], "na": { "value": "NA", "label": "Not applicable" } } }),
            OptionsLoad::Strict,
        )
        .expect("options load");
    session.toggle_option("allergy", "dust").expect("toggle");
    session.set_na("allergy", true).expect("na");
    assert_eq!(session.collect_data(), json!({ "allergy": "NA" }));
    assert!(session.validate().is_valid());

    session.set_na("allergy", false).expect("na off");
    assert_eq!(session.collect_data(), json!({}));
}
