use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, OnceLock};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime};

use crate::options::{expand_range_values, join_path, scalar_text, OptionsDocument};
use crate::refs::{ref_of, resolve_schema};
use crate::schema::{properties, required, schema_type, variants};

const MAX_DEPTH: usize = 32;
pub const ROOT_SECTION: &str = "form";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
  pub code: &'static str,
  pub path: String,
  pub message: String,
}

impl FieldError {
  fn new(code: &'static str, path: &str, message: impl Into<String>) -> Self {
    Self { code, path: path.to_string(), message: message.into() }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
  pub is_valid: bool,
  pub errors: Vec<FieldError>,
}

/// Whole-form result with errors grouped by top-level section.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormValidation {
  pub errors: Vec<FieldError>,
  pub by_section: BTreeMap<String, Vec<FieldError>>,
}

impl FormValidation {
  pub fn is_valid(&self) -> bool {
    self.errors.is_empty()
  }
}

pub struct ValidationContext<'a> {
  pub root: &'a Value,
  pub options: &'a OptionsDocument,
  /// Current option values of rendered choice fields, N/A included.
  pub live_options: BTreeMap<String, Vec<String>>,
}

impl<'a> ValidationContext<'a> {
  pub fn new(root: &'a Value, options: &'a OptionsDocument) -> Self {
    Self { root, options, live_options: BTreeMap::new() }
  }

  /// Custom allowed values for `path`. When present they replace the
  /// schema's `enum` entirely.
  fn custom_values(&self, path: &str) -> Option<Vec<String>> {
    if path.is_empty() {
      return None;
    }
    if let Some(live) = self.live_options.get(path) {
      return Some(live.clone());
    }
    let config = self.options.lookup(path)?;
    let mut allowed: Vec<String> = config.expanded_values().into_iter().map(|o| o.value).collect();
    if let Some(dependent) = &config.dependent_values {
      for raw in dependent.values() {
        allowed.extend(expand_range_values(raw).into_iter().map(|o| o.value));
      }
    }
    if let Some(na) = config.na_option() {
      allowed.push(na.value);
    }
    if allowed.is_empty() {
      return None;
    }
    Some(allowed)
  }
}

pub fn validate_value(value: &Value, fragment: &Value, path: &str, ctx: &ValidationContext<'_>) -> ValidationResult {
  let mut errors = Vec::new();
  let skip = BTreeSet::new();
  check(value, fragment, path, ctx, &mut errors, Walk { enforce_required: false, skip: &skip, depth: 0 });
  ValidationResult { is_valid: errors.is_empty(), errors }
}

/// Validates a collected document against the root schema, enforcing
/// `required`. Paths in `skip` (auto-disabled fields) are not checked.
pub fn validate_document(data: &Value, ctx: &ValidationContext<'_>, skip: &BTreeSet<String>) -> FormValidation {
  let mut errors = Vec::new();
  check(data, ctx.root, "", ctx, &mut errors, Walk { enforce_required: true, skip, depth: 0 });
  let mut by_section: BTreeMap<String, Vec<FieldError>> = BTreeMap::new();
  for error in &errors {
    by_section.entry(section_of(&error.path).to_string()).or_default().push(error.clone());
  }
  FormValidation { errors, by_section }
}

pub fn section_of(path: &str) -> &str {
  match path.split('.').next() {
    Some(first) if !first.is_empty() => first,
    _ => ROOT_SECTION,
  }
}

pub fn format_errors(errors: &[FieldError]) -> String {
  errors
    .iter()
    .map(|e| {
      let path = if e.path.is_empty() { "(root)" } else { e.path.as_str() };
      format!("{}: {}: {}", e.code, path, e.message)
    })
    .collect::<Vec<_>>()
    .join("\n")
}

#[derive(Clone, Copy)]
struct Walk<'s> {
  enforce_required: bool,
  skip: &'s BTreeSet<String>,
  depth: usize,
}

impl Walk<'_> {
  fn deeper(self) -> Self {
    Self { depth: self.depth + 1, ..self }
  }
}

fn check(value: &Value, fragment: &Value, path: &str, ctx: &ValidationContext<'_>, errors: &mut Vec<FieldError>, walk: Walk<'_>) {
  if walk.depth > MAX_DEPTH || walk.skip.contains(path) {
    return;
  }
  let Some(schema) = resolve_schema(fragment, ctx.root) else {
    tracing::debug!(path, reference = ref_of(fragment).unwrap_or_default(), "skipping validation of unresolved $ref");
    return;
  };
  if value.is_null() {
    return;
  }

  if let Some(list) = variants(&schema) {
    let matched = list.iter().any(|variant| {
      let mut trial = Vec::new();
      check(value, variant, path, ctx, &mut trial, walk.deeper());
      trial.is_empty()
    });
    if !matched {
      errors.push(FieldError::new("V701", path, "value matches none of the allowed variants"));
      return;
    }
    if properties(&schema).is_none() && schema_type(&schema).is_none() {
      return;
    }
  }

  match ctx.custom_values(path) {
    Some(allowed) => check_allowed(value, &allowed, path, errors),
    None => check_enum(value, &schema, path, errors),
  }

  let ty = schema_type(&schema).or_else(|| properties(&schema).map(|_| "object"));
  match ty {
    Some("string") => match value.as_str() {
      Some(text) => check_string(text, &schema, path, errors),
      None => errors.push(type_error(path, "string", value)),
    },
    Some("integer") => match value.as_f64() {
      Some(n) if n.fract() == 0.0 => check_number(n, &schema, path, errors),
      _ => errors.push(type_error(path, "integer", value)),
    },
    Some("number") => match value.as_f64() {
      Some(n) => check_number(n, &schema, path, errors),
      None => errors.push(type_error(path, "number", value)),
    },
    Some("boolean") => {
      if !value.is_boolean() {
        errors.push(type_error(path, "boolean", value));
      }
    }
    Some("array") => match value.as_array() {
      Some(items) => check_array(items, &schema, path, ctx, errors, walk),
      None => errors.push(type_error(path, "array", value)),
    },
    Some("object") => match value.as_object() {
      Some(_) => check_object(value, &schema, path, ctx, errors, walk),
      None => errors.push(type_error(path, "object", value)),
    },
    _ => {}
  }
}

fn check_object(
  value: &Value,
  schema: &Value,
  path: &str,
  ctx: &ValidationContext<'_>,
  errors: &mut Vec<FieldError>,
  walk: Walk<'_>,
) {
  let Some(map) = value.as_object() else {
    return;
  };
  if walk.enforce_required {
    for key in required(schema) {
      let child_path = join_path(path, &key);
      if walk.skip.contains(&child_path) {
        continue;
      }
      let missing = match map.get(&key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
      };
      if missing {
        errors.push(FieldError::new("V101", &child_path, "required value is missing"));
      }
    }
  }
  if let Some(props) = properties(schema) {
    for (key, child_schema) in props {
      if let Some(child) = map.get(key) {
        check(child, child_schema, &join_path(path, key), ctx, errors, walk.deeper());
      }
    }
  }
}

fn check_array(
  items: &[Value],
  schema: &Value,
  path: &str,
  ctx: &ValidationContext<'_>,
  errors: &mut Vec<FieldError>,
  walk: Walk<'_>,
) {
  if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
    if (items.len() as u64) < min {
      errors.push(FieldError::new("V601", path, format!("expected at least {min} item(s), found {}", items.len())));
    }
  }
  if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
    if items.len() as u64 > max {
      errors.push(FieldError::new("V602", path, format!("expected at most {max} item(s), found {}", items.len())));
    }
  }
  if schema.get("uniqueItems") == Some(&Value::Bool(true)) {
    let mut seen = BTreeSet::new();
    if items.iter().any(|item| !seen.insert(item.to_string())) {
      errors.push(FieldError::new("V603", path, "items must be unique"));
    }
  }
  let Some(item_schema) = schema.get("items") else {
    return;
  };
  // Custom options on a multi-choice array were already checked per element.
  let element_walk = walk.deeper();
  for (idx, item) in items.iter().enumerate() {
    let item_path = join_path(path, &idx.to_string());
    if item.is_object() || item.is_array() || ctx.custom_values(path).is_none() {
      check(item, item_schema, &item_path, ctx, errors, element_walk);
    }
  }
}

fn check_string(text: &str, schema: &Value, path: &str, errors: &mut Vec<FieldError>) {
  let len = text.chars().count() as u64;
  if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
    if len < min {
      errors.push(FieldError::new("V401", path, format!("must be at least {min} character(s)")));
    }
  }
  if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
    if len > max {
      errors.push(FieldError::new("V402", path, format!("must be at most {max} character(s)")));
    }
  }
  if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
    match compiled(pattern) {
      Some(re) if !re.is_match(text) => {
        errors.push(FieldError::new("V403", path, format!("does not match pattern {pattern}")));
      }
      Some(_) => {}
      None => tracing::warn!(path, pattern, "schema pattern is not a valid regex; skipping"),
    }
  }
  if let Some(format) = schema.get("format").and_then(Value::as_str) {
    let ok = match format {
      "date" => parse_date(text).is_some(),
      "date-time" => OffsetDateTime::parse(text, &Rfc3339).is_ok() || parse_date(text).is_some(),
      "email" => is_email(text),
      _ => true,
    };
    if !ok {
      errors.push(FieldError::new("V404", path, format!("is not a valid {format}")));
    }
  }
}

fn check_number(n: f64, schema: &Value, path: &str, errors: &mut Vec<FieldError>) {
  let bound = |key: &str| schema.get(key).and_then(Value::as_f64);
  if let Some(min) = bound("minimum") {
    if n < min {
      errors.push(FieldError::new("V301", path, format!("must be >= {min}")));
    }
  }
  if let Some(max) = bound("maximum") {
    if n > max {
      errors.push(FieldError::new("V302", path, format!("must be <= {max}")));
    }
  }
  if let Some(min) = bound("exclusiveMinimum") {
    if n <= min {
      errors.push(FieldError::new("V303", path, format!("must be > {min}")));
    }
  }
  if let Some(max) = bound("exclusiveMaximum") {
    if n >= max {
      errors.push(FieldError::new("V303", path, format!("must be < {max}")));
    }
  }
  if let Some(step) = bound("multipleOf").filter(|s| *s > 0.0) {
    let ratio = n / step;
    if (ratio - ratio.round()).abs() > 1e-9 {
      errors.push(FieldError::new("V304", path, format!("must be a multiple of {step}")));
    }
  }
}

fn check_allowed(value: &Value, allowed: &[String], path: &str, errors: &mut Vec<FieldError>) {
  let values: Vec<String> = match value {
    Value::Array(items) => items.iter().filter(|i| !i.is_object()).map(scalar_text).collect(),
    Value::Object(_) => return,
    other => vec![scalar_text(other)],
  };
  for text in values {
    if !allowed.iter().any(|a| a == &text) {
      errors.push(FieldError::new("V501", path, format!("'{text}' is not one of the allowed options")));
    }
  }
}

fn check_enum(value: &Value, schema: &Value, path: &str, errors: &mut Vec<FieldError>) {
  let Some(list) = schema.get("enum").and_then(Value::as_array) else {
    return;
  };
  let text = scalar_text(value);
  if !list.iter().any(|e| e == value || scalar_text(e) == text) {
    errors.push(FieldError::new("V501", path, format!("'{text}' is not one of the allowed values")));
  }
}

fn type_error(path: &str, expected: &str, value: &Value) -> FieldError {
  let found = match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  };
  FieldError::new("V201", path, format!("expected {expected}, found {found}"))
}

/// YYYY-MM-DD with a real calendar date.
pub fn parse_date(value: &str) -> Option<Date> {
  let mut parts = value.split('-');
  let year: i32 = parts.next()?.parse().ok()?;
  let month: u8 = parts.next()?.parse().ok()?;
  let day: u8 = parts.next()?.parse().ok()?;
  if parts.next().is_some() {
    return None;
  }
  let month = Month::try_from(month).ok()?;
  Date::from_calendar_date(year, month, day).ok()
}

fn is_email(text: &str) -> bool {
  static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
  PATTERN
    .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
    .as_ref()
    .is_some_and(|re| re.is_match(text))
}

fn compiled(pattern: &str) -> Option<Regex> {
  static CACHE: OnceLock<Mutex<HashMap<String, Option<Regex>>>> = OnceLock::new();
  let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
  let Ok(mut cache) = cache.lock() else {
    return Regex::new(pattern).ok();
  };
  cache
    .entry(pattern.to_string())
    .or_insert_with(|| Regex::new(pattern).ok())
    .clone()
}
