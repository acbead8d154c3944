use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Map};

use formsmith::form::FieldValue;
use formsmith::html::{emit_html, escape, render_document, render_form};
use formsmith::{FormSession, OptionsLoad};

fn temp_dir(name: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_millis();
    let dir = std::env::temp_dir().join(format!("formsmith_{name}_{stamp}"));
    fs::create_dir_all(&dir).expect("mkdir");
    dir
}

fn tabbed_session() -> FormSession {
    let mut props = Map::new();
    for idx in 0..5 {
        props.insert(format!("p{idx}"), json!({ "type": "string" }));
    }
    props.insert("address".to_string(), json!({ "$ref": "#/$defs/Address" }));
    FormSession::new(json!({
        "type": "object",
        "$defs": { "Address": { "type": "object", "properties": { "city": { "type": "string" } } } },
        "properties": props
    }))
}

#[test]
fn tabs_render_a_nav_and_lazy_sections() {
    let session = tabbed_session();
    let html = render_form(&session);
    assert!(html.contains(r#"data-strategy="multi-section-tabs""#));
    assert!(html.contains(r#"<nav class="tabs">"#));
    assert!(html.contains(r#"<button type="button" data-tab="p0" aria-selected="true">P0</button>"#));
    assert!(html.contains(r#"<section data-tab="address" data-lazy="true" hidden></section>"#));
    assert!(!html.contains("address.city"));
}

#[test]
fn activated_tab_renders_its_fields() {
    let mut session = tabbed_session();
    session.activate_tab("address").expect("tab");
    let html = render_form(&session);
    assert!(html.contains(r#"data-path="address.city""#));
    assert!(html.contains(r#"data-tab="address" aria-selected="true""#));
}

#[test]
fn text_is_escaped() {
    assert_eq!(escape(r#"<a & "b">"#), "&lt;a &amp; &quot;b&quot;&gt;");
    let session = FormSession::new(json!({
        "type": "object",
        "properties": { "name": { "type": "string", "title": "Name <full>" } }
    }));
    let page = render_document(&session, "Tom & Jerry");
    assert!(page.contains("<title>Tom &amp; Jerry</title>"));
    assert!(page.contains("Name &lt;full&gt;"));
    assert!(!page.contains("<full>"));
}

#[test]
fn rule_disabled_fields_are_marked() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "properties": {
            "smoker": { "type": "string", "enum": ["yes", "no"] },
            "brand": { "type": "string" }
        }
    }));
    session
        .load_options(
            &json!({ "conditional_rules": { "smoker": [{ "value": "no", "disable_fields": ["brand"] }] } }),
            OptionsLoad::Strict,
        )
        .expect("options load");
    session.set_value("smoker", FieldValue::Text("no".into())).expect("set");

    let html = render_form(&session);
    assert!(html.contains(r#"<div class="field control-text auto-disabled">"#));
    assert!(html.contains(r#"data-path="brand" disabled value="N/A""#));
}

#[test]
fn na_toggle_follows_the_field() {
    let mut session = FormSession::new(json!({
        "type": "object",
        "properties": { "allergy": { "type": "string" } }
    }));
    session
        .load_options(
            &json!({ "allergy": { "values": ["peanut"], "na": { "value": "NA", "label": "Not applicable" } } }),
            OptionsLoad::Strict,
        )
        .expect("options load");
    assert!(render_form(&session).contains(r#"data-na-for="allergy" value="NA" /> Not applicable"#));

    session.set_na("allergy", true).expect("na");
    assert!(render_form(&session).contains(r#"data-na-for="allergy" value="NA" checked /> Not applicable"#));
}

#[test]
fn emit_creates_missing_directories() {
    let dir = temp_dir("emit_html");
    let out = dir.join("nested").join("form.html");
    let session = FormSession::new(json!({
        "type": "object",
        "properties": { "name": { "type": "string" } }
    }));
    emit_html(&session, "Form", &out).expect("emit");
    let page = fs::read_to_string(&out).expect("read");
    assert!(page.starts_with("<!doctype html>"));
    assert!(page.contains(r#"<input type="text" id="field-name" name="name" data-path="name" value="" />"#));
}

#[test]
fn control_ids_stay_distinct_per_path() {
    let session = FormSession::new(json!({
        "type": "object",
        "properties": {
            "a": { "type": "object", "properties": { "b": { "type": "string" } } },
            "a_b": { "type": "string" },
            "a-b": { "type": "string" }
        }
    }));
    let html = render_form(&session);
    assert!(html.contains(r#"id="field-a_b" name="a.b""#), "{html}");
    assert!(html.contains(r#"id="field-a__b" name="a_b""#), "{html}");
    assert!(html.contains(r#"id="field-a--b" name="a-b""#), "{html}");
}
