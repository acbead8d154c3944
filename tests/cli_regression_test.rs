use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

fn formsmith_bin() -> &'static str {
    env!("CARGO_BIN_EXE_formsmith")
}

fn temp_dir(name: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_millis();
    let dir = std::env::temp_dir().join(format!("formsmith_cli_{name}_{stamp}"));
    fs::create_dir_all(&dir).expect("mkdir");
    dir
}

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_string_pretty(value).expect("json")).expect("write");
}

fn person_schema() -> Value {
    json!({
        "type": "object",
        "required": ["name"],
        "properties": {
            "name": { "type": "string" },
            "age": { "type": "integer", "minimum": 0 },
            "grade": { "type": "string" }
        }
    })
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(formsmith_bin())
        .args(args)
        .current_dir(dir)
        .env("FORMSMITH_LOG", "off")
        .output()
        .expect("run")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn describe(out: &Output) -> String {
    format!("stdout={} stderr={}", stdout(out), String::from_utf8_lossy(&out.stderr))
}

#[test]
fn version_flag_prints_package_version() {
    let dir = temp_dir("version");
    let out = run(&dir, &["--version"]);
    assert!(out.status.success(), "{}", describe(&out));
    assert_eq!(stdout(&out).trim(), format!("formsmith {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn analyze_reports_the_strategy() {
    let dir = temp_dir("analyze");
    write_json(&dir.join("schema.json"), &person_schema());
    let out = run(&dir, &["analyze", "schema.json"]);
    assert!(out.status.success(), "{}", describe(&out));
    let s = stdout(&out);
    assert!(s.contains("strategy: single-form-flat"), "{s}");
    assert!(s.contains("properties: 3"), "{s}");
}

#[test]
fn check_options_fails_on_unknown_keys() {
    let dir = temp_dir("check_options");
    write_json(&dir.join("schema.json"), &person_schema());
    write_json(
        &dir.join("options.json"),
        &json!({ "grade": { "values": ["A", "B"] }, "ghost": { "values": ["x"] } }),
    );
    let out = run(&dir, &["check-options", "schema.json", "options.json"]);
    assert!(!out.status.success(), "{}", describe(&out));
    let s = stdout(&out);
    assert!(s.contains("Unmatched options keys:"), "{s}");
    assert!(s.contains("ghost (field options)"), "{s}");

    write_json(&dir.join("clean.json"), &json!({ "grade": { "values": ["A", "B"] } }));
    let out = run(&dir, &["check-options", "schema.json", "clean.json"]);
    assert!(out.status.success(), "{}", describe(&out));
    assert!(stdout(&out).contains("All options keys match the schema"));
}

#[test]
fn fill_applies_edits_and_writes_json() {
    let dir = temp_dir("fill");
    write_json(&dir.join("schema.json"), &person_schema());
    write_json(&dir.join("options.json"), &json!({ "grade": { "values": ["A", "B"] } }));
    let out = run(
        &dir,
        &[
            "fill",
            "schema.json",
            "--options",
            "options.json",
            "--set",
            "name=Ada",
            "--set",
            "age=36",
            "--set",
            "grade=B",
            "--out",
            "out.json",
        ],
    );
    assert!(out.status.success(), "{}", describe(&out));
    assert!(stdout(&out).contains("Wrote out.json"));

    let written: Value = serde_json::from_str(&fs::read_to_string(dir.join("out.json")).expect("read")).expect("json");
    assert_eq!(written, json!({ "name": "Ada", "age": 36, "grade": "B" }));
}

#[test]
fn fill_refuses_invalid_forms_unless_forced() {
    let dir = temp_dir("fill_force");
    write_json(&dir.join("schema.json"), &person_schema());
    let out = run(&dir, &["fill", "schema.json", "--set", "age=-1"]);
    assert!(!out.status.success(), "{}", describe(&out));
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(stderr.contains("V101: name"), "{stderr}");
    assert!(stderr.contains("V301: age"), "{stderr}");

    let out = run(&dir, &["fill", "schema.json", "--set", "age=-1", "--force"]);
    assert!(out.status.success(), "{}", describe(&out));
    let exported: Value = serde_json::from_str(&stdout(&out)).expect("json on stdout");
    assert_eq!(exported, json!({ "age": -1 }));
}

#[test]
fn validate_expands_globs_and_fails_on_bad_files() {
    let dir = temp_dir("validate");
    write_json(&dir.join("schema.json"), &person_schema());
    fs::create_dir_all(dir.join("data")).expect("mkdir data");
    write_json(&dir.join("data").join("good.json"), &json!({ "name": "Ada", "age": 36 }));
    write_json(&dir.join("data").join("bad.json"), &json!({ "age": "old" }));

    let out = run(&dir, &["validate", "schema.json", "data/*.json"]);
    assert!(!out.status.success(), "{}", describe(&out));
    let s = stdout(&out);
    assert!(s.contains("ok data/good.json"), "{s}");
    assert!(s.contains("FAIL data/bad.json"), "{s}");
    assert!(s.contains("V101: name"), "{s}");
    assert!(s.contains("V201: age"), "{s}");

    let out = run(&dir, &["validate", "schema.json", "data/good.json"]);
    assert!(out.status.success(), "{}", describe(&out));
}

#[test]
fn render_writes_html_and_remembers_the_schema() {
    let dir = temp_dir("render");
    write_json(&dir.join("schema.json"), &person_schema());
    let out = run(&dir, &["render", "schema.json", "--out", "site/form.html"]);
    assert!(out.status.success(), "{}", describe(&out));

    let html = fs::read_to_string(dir.join("site").join("form.html")).expect("html written");
    assert!(html.contains("<form"));
    assert!(html.contains(r#"data-path="name""#));
    assert!(html.contains("<title>schema - formsmith</title>"));

    let out = run(&dir, &["recent"]);
    assert!(out.status.success(), "{}", describe(&out));
    let s = stdout(&out);
    assert!(s.contains("schema:  schema.json"), "{s}");
    assert!(s.contains("options: (none)"), "{s}");
}
