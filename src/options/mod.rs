use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::refs::{ref_of, resolve_schema};
use crate::schema::{properties, variants};

const MAX_RANGE_LEN: u64 = 10_000;
const MAX_INDEX_DEPTH: usize = 24;
pub const CONDITIONAL_RULES_KEY: &str = "conditional_rules";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumOption {
    pub value: String,
    pub label: String,
}

impl EnumOption {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self { label: value.clone(), value }
    }

    pub fn labeled(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self { value: value.into(), label: label.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOption {
    Pair {
        value: Value,
        #[serde(default)]
        label: Option<String>,
    },
    Text(String),
    Scalar(Value),
}

impl RawOption {
    pub fn value_text(&self) -> String {
        match self {
            RawOption::Pair { value, .. } | RawOption::Scalar(value) => scalar_text(value),
            RawOption::Text(s) => s.clone(),
        }
    }

    pub fn normalize(&self) -> EnumOption {
        match self {
            RawOption::Pair { value, label } => {
                let value = scalar_text(value);
                let label = label.clone().unwrap_or_else(|| value.clone());
                EnumOption { value, label }
            }
            other => EnumOption::new(other.value_text()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseType {
    SingleSelect,
    MultiSelect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputControl {
    DropDown,
    MultiSelect,
    Checkboxes,
    Radio,
    Slider,
    DateTimePicker,
    Text,
}

impl InputControl {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "drop-down" | "dropdown" | "select" => InputControl::DropDown,
            "multi-select" | "multiselect" => InputControl::MultiSelect,
            "checkboxes" | "checkbox" | "check-boxes" => InputControl::Checkboxes,
            "radio" | "radio-buttons" | "radio-button" => InputControl::Radio,
            "slider" | "range" => InputControl::Slider,
            "date-time-picker" | "datetime" | "date" => InputControl::DateTimePicker,
            "text" | "textbox" => InputControl::Text,
            other => {
                tracing::warn!(input_control = other, "unknown input_control; using drop-down");
                InputControl::DropDown
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldOptionConfig {
    #[serde(default)]
    pub values: Vec<RawOption>,
    #[serde(default)]
    pub na: Option<RawOption>,
    #[serde(default)]
    pub input_control: Option<String>,
    #[serde(default)]
    pub response_type: Option<ResponseType>,
    #[serde(default)]
    pub exclusive_values: Vec<String>,
    #[serde(default)]
    pub dependent_values: Option<BTreeMap<String, Vec<RawOption>>>,
    #[serde(default, alias = "dependent_on", alias = "trigger")]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
}

impl FieldOptionConfig {
    pub fn control(&self) -> InputControl {
        self.input_control
            .as_deref()
            .map(InputControl::parse)
            .unwrap_or(InputControl::DropDown)
    }

    pub fn is_multi(&self) -> bool {
        match self.control() {
            InputControl::MultiSelect | InputControl::Checkboxes => true,
            InputControl::DropDown => self.response_type == Some(ResponseType::MultiSelect),
            _ => false,
        }
    }

    pub fn expanded_values(&self) -> Vec<EnumOption> {
        expand_range_values(&self.values)
    }

    pub fn na_option(&self) -> Option<EnumOption> {
        self.na.as_ref().map(RawOption::normalize)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    pub value: Value,
    #[serde(default)]
    pub disable_fields: Vec<String>,
}

impl ConditionRule {
    pub fn value_text(&self) -> String {
        scalar_text(&self.value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptionsDocument {
    pub fields: BTreeMap<String, FieldOptionConfig>,
    pub conditional_rules: BTreeMap<String, Vec<ConditionRule>>,
}

impl OptionsDocument {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let Some(root) = value.as_object() else {
            return Err(serde_json::Error::custom("options document must be a JSON object"));
        };
        let mut doc = OptionsDocument::default();
        for (key, entry) in root {
            if key == CONDITIONAL_RULES_KEY {
                doc.conditional_rules = serde_json::from_value(entry.clone())
                    .map_err(|e| serde_json::Error::custom(format!("conditional_rules: {e}")))?;
                continue;
            }
            if !looks_like_field_options(entry) {
                tracing::debug!(key = %key, "skipping non-field entry in options document");
                continue;
            }
            let config: FieldOptionConfig = serde_json::from_value(entry.clone())
                .map_err(|e| serde_json::Error::custom(format!("options entry '{key}': {e}")))?;
            doc.fields.insert(key.clone(), config);
        }
        Ok(doc)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.conditional_rules.is_empty()
    }

    pub fn lookup(&self, path: &str) -> Option<&FieldOptionConfig> {
        self.lookup_key(path).and_then(|key| self.fields.get(key))
    }

    /// The options key that configures `path`: the exact path, then the path
    /// without array indices, then its last segment.
    pub fn lookup_key(&self, path: &str) -> Option<&str> {
        path_candidates(path)
            .into_iter()
            .find_map(|candidate| self.fields.get_key_value(&candidate).map(|(k, _)| k.as_str()))
    }
}

fn looks_like_field_options(entry: &Value) -> bool {
    let Some(obj) = entry.as_object() else {
        return false;
    };
    ["values", "input_control", "dependent_values", "na", "response_type"]
        .iter()
        .any(|key| obj.contains_key(*key))
}

pub fn path_candidates(path: &str) -> Vec<String> {
    let mut out = vec![path.to_string()];
    let stripped = strip_indices(path);
    if !out.contains(&stripped) {
        out.push(stripped);
    }
    if let Some(last) = path.rsplit('.').find(|seg| seg.parse::<usize>().is_err()) {
        let last = last.to_string();
        if !out.contains(&last) {
            out.push(last);
        }
    }
    out
}

pub fn strip_indices(path: &str) -> String {
    path.split('.')
        .filter(|seg| seg.parse::<usize>().is_err())
        .collect::<Vec<_>>()
        .join(".")
}

pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn range_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*(\d+)\s*-\s*(\d+)\s*$").ok())
        .as_ref()
}

fn parse_range(text: &str) -> Option<(u64, u64)> {
    let caps = range_pattern()?.captures(text)?;
    let start = caps.get(1)?.as_str().parse::<u64>().ok()?;
    let end = caps.get(2)?.as_str().parse::<u64>().ok()?;
    if start > end || end - start >= MAX_RANGE_LEN {
        return None;
    }
    Some((start, end))
}

/// Canonical option list for raw option values. `"10-20"` expands to the
/// integers 10..=20; a reversed or oversized range stays a literal option.
pub fn expand_range_values(raw: &[RawOption]) -> Vec<EnumOption> {
    let mut out = Vec::new();
    for option in raw {
        match option {
            RawOption::Text(text) => match parse_range(text) {
                Some((start, end)) => out.extend((start..=end).map(|n| EnumOption::new(n.to_string()))),
                None => out.push(EnumOption::new(text.clone())),
            },
            other => out.push(other.normalize()),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    FieldOptions,
    DependsOn,
    ConditionTrigger,
    DisableField,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            KeySource::FieldOptions => "field options",
            KeySource::DependsOn => "depends_on",
            KeySource::ConditionTrigger => "conditional rule trigger",
            KeySource::DisableField => "disable_fields entry",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct UnmatchedKey {
    pub key: String,
    pub source: KeySource,
}

/// Every key the options document uses that names no property of `schema`.
pub fn find_unmatched_keys(doc: &OptionsDocument, schema: &Value) -> Vec<UnmatchedKey> {
    let index = SchemaPathIndex::build(schema);
    let mut seen = BTreeSet::new();
    let mut check = |key: &str, source: KeySource| {
        if !index.contains(key) {
            seen.insert(UnmatchedKey { key: key.to_string(), source });
        }
    };

    for (key, config) in &doc.fields {
        check(key, KeySource::FieldOptions);
        if let Some(trigger) = &config.depends_on {
            check(trigger, KeySource::DependsOn);
        }
    }
    for (trigger, rules) in &doc.conditional_rules {
        check(trigger, KeySource::ConditionTrigger);
        for rule in rules {
            for field in &rule.disable_fields {
                check(field, KeySource::DisableField);
            }
        }
    }
    seen.into_iter().collect()
}

#[derive(Debug, Default)]
pub struct SchemaPathIndex {
    paths: BTreeSet<String>,
    names: BTreeSet<String>,
}

impl SchemaPathIndex {
    pub fn build(schema: &Value) -> Self {
        let mut index = SchemaPathIndex::default();
        let mut stack = Vec::new();
        index.walk(schema, schema, "", &mut stack, 0);
        index
    }

    pub fn contains(&self, key: &str) -> bool {
        let key = strip_indices(key);
        if self.paths.contains(&key) {
            return true;
        }
        !key.contains('.') && self.names.contains(&key)
    }

    fn walk(&mut self, node: &Value, root: &Value, prefix: &str, stack: &mut Vec<String>, depth: usize) {
        if depth > MAX_INDEX_DEPTH {
            return;
        }
        let reference = ref_of(node).map(str::to_string);
        if let Some(reference) = &reference {
            if stack.contains(reference) {
                return;
            }
            stack.push(reference.clone());
        }
        let resolved = resolve_schema(node, root).unwrap_or_else(|| node.clone());

        if let Some(props) = properties(&resolved) {
            for (name, child) in props {
                let path = join_path(prefix, name);
                self.names.insert(name.clone());
                self.paths.insert(path.clone());
                self.walk(child, root, &path, stack, depth + 1);
            }
        }
        if let Some(list) = variants(&resolved) {
            for variant in list {
                self.walk(variant, root, prefix, stack, depth + 1);
            }
        }
        if let Some(list) = resolved.get("allOf").and_then(Value::as_array) {
            for part in list {
                self.walk(part, root, prefix, stack, depth + 1);
            }
        }
        if let Some(items) = resolved.get("items") {
            self.walk(items, root, prefix, stack, depth + 1);
        }

        if reference.is_some() {
            stack.pop();
        }
    }
}

pub fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
