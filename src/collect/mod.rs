use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::deps;
use crate::form::{ControlKind, Field, FieldValue, FormTree, NodeKind};
use crate::options::{join_path, scalar_text};
use crate::refs::resolve_or_self;
use crate::schema::{properties, required, schema_type, variants};
use crate::session::FormSession;

const FINGERPRINT_DEPTH: usize = 8;

/// How a control's state turns into data. Every field lands in exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollectedKind {
  CheckboxList,
  NaCheckbox,
  MultiSelect,
  RadioGroup,
  Slider,
  BooleanCheckbox,
  Number,
  Date,
  CommaTextarea,
  PlainText,
}

pub fn classify(field: &Field) -> CollectedKind {
  if field.na_checked && field.na.is_some() {
    return CollectedKind::NaCheckbox;
  }
  match field.control {
    ControlKind::CheckboxGroup => CollectedKind::CheckboxList,
    ControlKind::MultiSelect => CollectedKind::MultiSelect,
    ControlKind::RadioGroup => CollectedKind::RadioGroup,
    ControlKind::Slider { .. } => CollectedKind::Slider,
    ControlKind::Checkbox => CollectedKind::BooleanCheckbox,
    ControlKind::Number { .. } => CollectedKind::Number,
    ControlKind::Date | ControlKind::DateTime => CollectedKind::Date,
    ControlKind::TextArea { comma_list: true } => CollectedKind::CommaTextarea,
    ControlKind::Text | ControlKind::TextArea { comma_list: false } | ControlKind::Dropdown => CollectedKind::PlainText,
  }
}

/// Nested data for every rendered field, built by path segmentation.
pub fn collect_form_data(tree: &FormTree) -> Value {
  let mut data = Value::Object(Map::new());
  let mut processed = HashSet::new();
  for id in tree.walk() {
    let Some(node) = tree.node(id) else {
      continue;
    };
    match &node.kind {
      NodeKind::Array(array) => {
        for (idx, _) in array.items.iter().enumerate() {
          let item_path = join_path(&node.path, &idx.to_string());
          if value_at(&data, &item_path).is_none() {
            set_by_path(&mut data, &item_path, Value::Object(Map::new()));
          }
        }
      }
      NodeKind::Field(field) => {
        if !processed.insert(node.path.clone()) {
          continue;
        }
        if let Some(value) = field_json(field) {
          set_by_path(&mut data, &node.path, value);
        }
      }
      _ => {}
    }
  }
  data
}

pub fn field_json(field: &Field) -> Option<Value> {
  let item_type = field
    .schema
    .get("items")
    .and_then(schema_type)
    .map(str::to_string);
  let own_type = schema_type(&field.schema).map(str::to_string);
  match classify(field) {
    CollectedKind::NaCheckbox => field.na.as_ref().map(|na| Value::String(na.value.clone())),
    CollectedKind::CheckboxList | CollectedKind::MultiSelect => match &field.value {
      FieldValue::Multi(list) if !list.is_empty() => Some(Value::Array(
        list.iter().map(|v| typed_scalar(v, item_type.as_deref())).collect(),
      )),
      FieldValue::Text(s) if !s.trim().is_empty() => Some(Value::Array(vec![typed_scalar(s, item_type.as_deref())])),
      _ => None,
    },
    CollectedKind::BooleanCheckbox => match &field.value {
      FieldValue::Flag(b) => Some(Value::Bool(*b)),
      FieldValue::Text(s) if !s.trim().is_empty() => Some(Value::Bool(s.trim() == "true")),
      _ => None,
    },
    CollectedKind::Slider | CollectedKind::Number => {
      let text = field.value.display();
      let text = text.trim();
      if text.is_empty() {
        return None;
      }
      let integer = matches!(field.control, ControlKind::Number { integer: true, .. });
      parse_number(text, integer).or_else(|| Some(Value::String(text.to_string())))
    }
    CollectedKind::CommaTextarea => {
      let list: Vec<Value> = match &field.value {
        FieldValue::Multi(list) => list.iter().map(|v| typed_scalar(v, item_type.as_deref())).collect(),
        other => other
          .display()
          .split(',')
          .map(str::trim)
          .filter(|s| !s.is_empty())
          .map(|s| typed_scalar(s, item_type.as_deref()))
          .collect(),
      };
      (!list.is_empty()).then_some(Value::Array(list))
    }
    CollectedKind::Date | CollectedKind::RadioGroup | CollectedKind::PlainText => match &field.value {
      FieldValue::Multi(list) if !list.is_empty() => {
        Some(Value::Array(list.iter().map(|v| Value::String(v.clone())).collect()))
      }
      FieldValue::Flag(b) => Some(Value::Bool(*b)),
      FieldValue::Empty | FieldValue::Multi(_) => None,
      FieldValue::Text(text) => Some(typed_scalar(text, own_type.as_deref())),
    },
  }
}

/// Integer literals become integers, anything else numeric a float.
pub fn parse_number(text: &str, integer_only: bool) -> Option<Value> {
  if let Ok(n) = text.parse::<i64>() {
    return Some(Value::Number(n.into()));
  }
  if integer_only {
    return None;
  }
  text.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}

fn typed_scalar(text: &str, ty: Option<&str>) -> Value {
  match ty {
    Some("integer") => parse_number(text, true).unwrap_or_else(|| Value::String(text.to_string())),
    Some("number") => parse_number(text, false).unwrap_or_else(|| Value::String(text.to_string())),
    Some("boolean") => match text {
      "true" => Value::Bool(true),
      "false" => Value::Bool(false),
      _ => Value::String(text.to_string()),
    },
    _ => Value::String(text.to_string()),
  }
}

pub fn set_by_path(target: &mut Value, path: &str, value: Value) {
  let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
  if segments.is_empty() {
    *target = value;
    return;
  }
  insert_at(target, &segments, value);
}

fn insert_at(target: &mut Value, segments: &[&str], value: Value) {
  let Some((head, rest)) = segments.split_first() else {
    return;
  };
  if let Ok(idx) = head.parse::<usize>() {
    if !target.is_array() {
      *target = Value::Array(Vec::new());
    }
    if let Value::Array(items) = target {
      while items.len() <= idx {
        items.push(Value::Null);
      }
      if rest.is_empty() {
        items[idx] = value;
      } else {
        insert_at(&mut items[idx], rest, value);
      }
    }
    return;
  }
  if !target.is_object() {
    *target = Value::Object(Map::new());
  }
  if let Value::Object(map) = target {
    let slot = map.entry(head.to_string()).or_insert(Value::Null);
    if rest.is_empty() {
      *slot = value;
    } else {
      insert_at(slot, rest, value);
    }
  }
}

pub fn value_at<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
  let mut current = data;
  for segment in path.split('.').filter(|s| !s.is_empty()) {
    current = match current {
      Value::Object(map) => map.get(segment)?,
      Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PopulateReport {
  pub applied: Vec<String>,
  pub invalid: Vec<String>,
  pub unmatched: Vec<String>,
  pub variants: Vec<(String, String)>,
}

/// Loads `data` into the session's form. Every tab is materialized first,
/// branches and array items are created as the data requires, and triggers
/// are recomputed without clearing the values just loaded.
pub fn populate_form_with_data(session: &mut FormSession, data: &Value) -> PopulateReport {
  session.is_populating = true;
  session.render_all_tabs();
  let mut report = PopulateReport::default();
  populate_value(session, "", data, &mut report);
  deps::refresh_all(session);
  session.is_populating = false;

  for path in session.tree.field_paths() {
    if session.tree.field(&path).is_some_and(Field::is_invalid) && !report.invalid.contains(&path) {
      report.invalid.push(path);
    }
  }
  report.invalid.retain(|path| session.tree.field(path).is_some_and(Field::is_invalid));
  report
}

fn populate_value(session: &mut FormSession, path: &str, value: &Value, report: &mut PopulateReport) {
  select_branches(session, path, value, report);

  if let Some(field_id) = session.tree.find(path).filter(|id| session.tree.field_at(*id).is_some()) {
    let Some(field) = session.tree.field_at_mut(field_id) else {
      return;
    };
    if set_field_from_json(field, value) {
      report.applied.push(path.to_string());
    } else {
      report.invalid.push(path.to_string());
    }
    return;
  }

  match value {
    Value::Object(map) => {
      for (key, child) in map {
        populate_value(session, &join_path(path, key), child, report);
      }
    }
    Value::Array(items) if session.tree.array(path).is_some() => {
      let existing = session.tree.array(path).map(|a| a.items.len()).unwrap_or(0);
      for _ in existing..items.len() {
        if session.add_array_item(path).is_err() {
          break;
        }
      }
      let current = session.tree.array(path).map(|a| a.items.len()).unwrap_or(0);
      for idx in (items.len()..current).rev() {
        let _ = session.remove_array_item(path, idx);
      }
      for (idx, child) in items.iter().enumerate() {
        populate_value(session, &join_path(path, &idx.to_string()), child, report);
      }
    }
    Value::Null => {}
    _ => {
      tracing::debug!(path, "no rendered control for loaded value");
      report.unmatched.push(path.to_string());
    }
  }
}

/// Selects polymorphic branches bound to `path`, outermost first, so the
/// nested selector created by one selection is handled in the next round.
fn select_branches(session: &mut FormSession, path: &str, value: &Value, report: &mut PopulateReport) {
  let mut handled = HashSet::new();
  loop {
    let next = session
      .tree
      .selectors(path)
      .into_iter()
      .find(|id| !handled.contains(id));
    let Some(selector_id) = next else {
      return;
    };
    handled.insert(selector_id);
    let Some(selector) = session.tree.selector_at(selector_id) else {
      return;
    };
    let schemas: Vec<Value> = selector.variants.iter().map(|v| v.schema.clone()).collect();
    let Some(choice) = infer_variant(value, &schemas, &session.schema) else {
      tracing::warn!(path, "loaded data matches no polymorphic branch");
      continue;
    };
    let title = selector.variants[choice].title.clone();
    if session.select_variant_at(selector_id, choice).is_ok() {
      report.variants.push((path.to_string(), title));
    }
  }
}

/// Index of the branch `value` was most likely built from. A branch is out
/// when a required key is missing, a `const` disagrees or the value's JSON
/// kind does not fit; ties go to the earlier branch.
pub fn infer_variant(value: &Value, candidates: &[Value], root: &Value) -> Option<usize> {
  let mut best: Option<(usize, i64)> = None;
  for (idx, candidate) in candidates.iter().enumerate() {
    let resolved = resolve_or_self(candidate, root);
    let Some(score) = fingerprint_score(value, &resolved, root, 0) else {
      continue;
    };
    if best.map_or(true, |(_, top)| score > top) {
      best = Some((idx, score));
    }
  }
  best.map(|(idx, _)| idx)
}

fn fingerprint_score(value: &Value, schema: &Value, root: &Value, depth: usize) -> Option<i64> {
  if depth > FINGERPRINT_DEPTH {
    return Some(0);
  }
  if let Some(list) = variants(schema) {
    let nested = list
      .iter()
      .filter_map(|v| fingerprint_score(value, &resolve_or_self(v, root), root, depth + 1))
      .max();
    if properties(schema).is_none() {
      return nested;
    }
    nested?;
  }

  match value {
    Value::Object(map) => {
      if matches!(schema_type(schema), Some(t) if t != "object") {
        return None;
      }
      let required = required(schema);
      if required.iter().any(|key| !map.contains_key(key)) {
        return None;
      }
      let props = properties(schema);
      let mut matching = 0i64;
      let mut extra = 0i64;
      for (key, child) in map {
        match props.and_then(|p| p.get(key)) {
          Some(prop) => {
            let prop = resolve_or_self(prop, root);
            if let Some(expected) = prop.get("const") {
              if expected != child {
                return None;
              }
              matching += 5;
            }
            matching += 1;
          }
          None => extra += 1,
        }
      }
      let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
      if closed && extra > 0 {
        return None;
      }
      Some(required.len() as i64 * 10 + matching * 3 - extra)
    }
    scalar => {
      let fits = match (schema_type(schema), scalar) {
        (None, _) => true,
        (Some("string"), Value::String(_)) => true,
        (Some("integer"), Value::Number(n)) => n.is_i64() || n.is_u64(),
        (Some("number"), Value::Number(_)) => true,
        (Some("boolean"), Value::Bool(_)) => true,
        (Some("array"), Value::Array(_)) => true,
        (Some("null"), Value::Null) => true,
        _ => false,
      };
      if !fits {
        return None;
      }
      if let Some(expected) = schema.get("const") {
        return (expected == scalar).then_some(5);
      }
      Some(1)
    }
  }
}

/// Writes a loaded value into a control. Returns false when the value was
/// retained as invalid instead.
pub fn set_field_from_json(field: &mut Field, value: &Value) -> bool {
  if let Some(na) = &field.na {
    let is_na = match value {
      Value::Array(items) => items.len() == 1 && scalar_text(&items[0]) == na.value,
      other => scalar_text(other) == na.value,
    };
    if is_na {
      field.na_checked = true;
      field.value = FieldValue::Empty;
      return true;
    }
  }
  field.na_checked = false;

  match &field.control {
    ControlKind::Checkbox => {
      field.value = match value {
        Value::Bool(b) => FieldValue::Flag(*b),
        other => FieldValue::Flag(scalar_text(other).trim() == "true"),
      };
      true
    }
    control if control.is_multi() => {
      let wanted: Vec<String> = match value {
        Value::Array(items) => items.iter().map(scalar_text).collect(),
        other => vec![scalar_text(other)],
      };
      let (present, missing): (Vec<String>, Vec<String>) =
        wanted.into_iter().partition(|v| field.has_option(v));
      field.value = if present.is_empty() { FieldValue::Empty } else { FieldValue::Multi(present) };
      retain_invalid(field, missing)
    }
    control if control.is_choice() => {
      let text = scalar_text(value);
      if field.has_option(&text) {
        field.value = FieldValue::Text(text);
        field.invalid = None;
        true
      } else {
        field.value = FieldValue::Empty;
        retain_invalid(field, vec![text])
      }
    }
    ControlKind::TextArea { comma_list: true } => {
      field.value = match value {
        Value::Array(items) => FieldValue::Text(items.iter().map(scalar_text).collect::<Vec<_>>().join(", ")),
        other => FieldValue::Text(scalar_text(other)),
      };
      true
    }
    _ => {
      field.value = match value {
        Value::Null => FieldValue::Empty,
        Value::Object(_) | Value::Array(_) => FieldValue::Text(value.to_string()),
        other => FieldValue::Text(scalar_text(other)),
      };
      true
    }
  }
}

fn retain_invalid(field: &mut Field, missing: Vec<String>) -> bool {
  if missing.is_empty() {
    field.invalid = None;
    return true;
  }
  tracing::debug!(values = ?missing, "loaded values not among current options");
  field.invalid = Some(missing);
  false
}
