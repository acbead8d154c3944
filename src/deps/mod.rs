use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::collect::{collect_form_data, value_at};
use crate::form::{ControlKind, Field, FieldValue, FormTree};
use crate::options::{
  expand_range_values, join_path, path_candidates, scalar_text, strip_indices, EnumOption, OptionsDocument, RawOption,
  ResponseType,
};
use crate::schema::schema_type;
use crate::session::FormSession;

pub const NUMERIC_SENTINEL: &str = "-9999";
pub const DATE_SENTINEL: &str = "1900-01-01";
pub const TEXT_SENTINEL: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerRule {
  pub affected: String,
  pub options_map: BTreeMap<String, Vec<RawOption>>,
  pub default_values: Vec<RawOption>,
  pub response_type: Option<ResponseType>,
  pub na: Option<EnumOption>,
}

impl TriggerRule {
  pub fn options_for(&self, trigger_value: &str) -> Vec<EnumOption> {
    let raw = self
      .options_map
      .get(trigger_value)
      .or_else(|| self.options_map.get(trigger_value.trim()))
      .unwrap_or(&self.default_values);
    expand_range_values(raw)
  }
}

pub type TriggerMap = BTreeMap<String, Vec<TriggerRule>>;

pub fn build_trigger_map(doc: &OptionsDocument) -> TriggerMap {
  let mut map = TriggerMap::new();
  for (key, config) in &doc.fields {
    let (Some(trigger), Some(dependent)) = (&config.depends_on, &config.dependent_values) else {
      if config.dependent_values.is_some() {
        tracing::warn!(field = %key, "dependent_values without depends_on; options stay static");
      }
      continue;
    };
    map.entry(trigger.clone()).or_default().push(TriggerRule {
      affected: key.clone(),
      options_map: dependent.clone(),
      default_values: config.values.clone(),
      response_type: config.response_type,
      na: config.na_option(),
    });
  }
  map
}

pub fn build_exclusive_map(doc: &OptionsDocument) -> BTreeMap<String, Vec<String>> {
  doc
    .fields
    .iter()
    .filter(|(_, config)| !config.exclusive_values.is_empty())
    .map(|(key, config)| (key.clone(), config.exclusive_values.clone()))
    .collect()
}

/// Dependent initialization waiting for its field to be materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingInit {
  pub trigger_path: String,
  pub trigger_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeOutcome {
  pub path: String,
  pub recomputed: Vec<String>,
  pub deferred: Vec<String>,
  pub restored: Vec<String>,
  pub still_invalid: Vec<String>,
  pub disabled: Vec<String>,
  pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recovery {
  pub restored: Vec<String>,
  pub remaining: Vec<String>,
}

pub fn trigger_key(triggers: &TriggerMap, path: &str) -> Option<String> {
  path_candidates(path).into_iter().find(|candidate| triggers.contains_key(candidate))
}

/// Runs after every field edit: option recompute (cascading), then
/// conditional rules over freshly collected data.
pub fn handle_change(session: &mut FormSession, path: &str) -> ChangeOutcome {
  let mut outcome = ChangeOutcome { path: path.to_string(), ..ChangeOutcome::default() };
  if trigger_key(&session.triggers, path).is_some() {
    let mut visited = BTreeSet::new();
    propagate(session, path, &mut visited, &mut outcome);
  }
  let data = collect_form_data(&session.tree);
  let (disabled, enabled) = apply_conditional_rules(session, &data);
  outcome.disabled = disabled;
  outcome.enabled = enabled;
  outcome
}

pub fn propagate(session: &mut FormSession, trigger_path: &str, visited: &mut BTreeSet<String>, outcome: &mut ChangeOutcome) {
  if !visited.insert(trigger_path.to_string()) {
    return;
  }
  let Some(key) = trigger_key(&session.triggers, trigger_path) else {
    return;
  };
  let rules = session.triggers.get(&key).cloned().unwrap_or_default();
  let value = session.tree.field(trigger_path).map(trigger_value).unwrap_or_default();

  for rule in &rules {
    let targets = resolve_related(&session.tree, trigger_path, &rule.affected);
    if targets.is_empty() {
      tracing::debug!(affected = %rule.affected, trigger = trigger_path, "dependent field not rendered yet; deferring");
      session.pending_inits.insert(
        rule.affected.clone(),
        PendingInit { trigger_path: trigger_path.to_string(), trigger_value: value.clone() },
      );
      outcome.deferred.push(rule.affected.clone());
      continue;
    }
    for target in targets {
      if let Some(recovery) = recompute_field(session, &target, rule, &value) {
        outcome.recomputed.push(target.clone());
        if !recovery.restored.is_empty() {
          outcome.restored.push(target.clone());
        }
        if !recovery.remaining.is_empty() {
          outcome.still_invalid.push(target.clone());
        }
      }
      propagate(session, &target, visited, outcome);
    }
  }
}

/// Replaces the field's option set for `trigger_value`. Outside population
/// the stale selection is cleared first.
pub fn recompute_field(session: &mut FormSession, path: &str, rule: &TriggerRule, trigger_value: &str) -> Option<Recovery> {
  let populating = session.is_populating;
  let field = session.tree.field_mut(path)?;
  field.options = rule.options_for(trigger_value);
  if rule.na.is_some() {
    field.na = rule.na.clone();
  }
  if populating {
    demote_missing(field);
  } else {
    field.value = FieldValue::Empty;
    field.na_checked = false;
  }
  Some(recover_invalid(field))
}

/// Moves selections absent from the current options into the invalid set.
pub fn demote_missing(field: &mut Field) {
  if !field.control.is_choice() || field.auto_disabled {
    return;
  }
  let (present, missing): (Vec<String>, Vec<String>) =
    field.value.selections().into_iter().partition(|v| field.has_option(v));
  if missing.is_empty() {
    return;
  }
  tracing::debug!(values = ?missing, "loaded values not among current options");
  let mut invalid = field.invalid.take().unwrap_or_default();
  for value in missing {
    if !invalid.contains(&value) {
      invalid.push(value);
    }
  }
  field.invalid = Some(invalid);
  field.value = selection_value(&field.control, present);
}

/// Restores retained invalid values that the current options now contain.
pub fn recover_invalid(field: &mut Field) -> Recovery {
  let Some(stored) = field.invalid.take() else {
    return Recovery::default();
  };
  let (restored, remaining): (Vec<String>, Vec<String>) = stored.into_iter().partition(|v| field.has_option(v));
  if !restored.is_empty() {
    let mut selections = if field.control.is_multi() { field.value.selections() } else { Vec::new() };
    for value in &restored {
      if !selections.contains(value) {
        selections.push(value.clone());
      }
    }
    field.value = selection_value(&field.control, selections);
  }
  if !remaining.is_empty() {
    field.invalid = Some(remaining.clone());
  }
  Recovery { restored, remaining }
}

fn selection_value(control: &ControlKind, mut selections: Vec<String>) -> FieldValue {
  if selections.is_empty() {
    return FieldValue::Empty;
  }
  if control.is_multi() {
    FieldValue::Multi(selections)
  } else {
    FieldValue::Text(selections.swap_remove(0))
  }
}

/// Toggles one value of a multi-choice control. An exclusive value clears
/// every other selection; any other value clears the exclusive ones.
pub fn toggle_selection(current: &[String], value: &str, exclusive: &[String]) -> Vec<String> {
  let mut next: Vec<String> = current.to_vec();
  if let Some(pos) = next.iter().position(|v| v == value) {
    next.remove(pos);
    return next;
  }
  if exclusive.iter().any(|e| e == value) {
    next.clear();
  } else {
    next.retain(|v| !exclusive.contains(v));
  }
  next.push(value.to_string());
  next
}

/// Applies a whole selection as if each value were picked in order.
pub fn select_in_order(values: &[String], exclusive: &[String]) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for value in values {
    if out.contains(value) {
      continue;
    }
    out = toggle_selection(&out, value, exclusive);
  }
  out
}

pub fn trigger_value(field: &Field) -> String {
  if field.na_checked {
    if let Some(na) = &field.na {
      return na.value.clone();
    }
  }
  match &field.value {
    FieldValue::Empty => String::new(),
    FieldValue::Text(s) => s.trim().to_string(),
    FieldValue::Flag(b) => b.to_string(),
    FieldValue::Multi(list) => list.first().cloned().unwrap_or_default(),
  }
}

pub fn sentinel_for(field: &Field) -> FieldValue {
  let ty = schema_type(&field.schema);
  let format = field.schema.get("format").and_then(Value::as_str);
  match &field.control {
    ControlKind::Checkbox => FieldValue::Flag(false),
    control if control.is_multi() => FieldValue::Multi(vec![TEXT_SENTINEL.to_string()]),
    control if control.is_numeric() || matches!(ty, Some("number" | "integer")) => {
      FieldValue::Text(NUMERIC_SENTINEL.to_string())
    }
    ControlKind::Date | ControlKind::DateTime => FieldValue::Text(DATE_SENTINEL.to_string()),
    _ if matches!(format, Some("date" | "date-time")) => FieldValue::Text(DATE_SENTINEL.to_string()),
    _ => FieldValue::Text(TEXT_SENTINEL.to_string()),
  }
}

/// Disables every field named by a matching rule and forces its sentinel.
/// Fields no rule names any more are re-enabled with their value kept.
pub fn apply_conditional_rules(session: &mut FormSession, data: &Value) -> (Vec<String>, Vec<String>) {
  let mut named = BTreeSet::new();
  for (trigger, rules) in &session.options.conditional_rules {
    for trigger_path in resolve_fields(&session.tree, trigger) {
      let live = value_at(data, &trigger_path);
      for rule in rules {
        if !value_matches(live, &rule.value_text()) {
          continue;
        }
        for target in &rule.disable_fields {
          named.extend(resolve_related(&session.tree, &trigger_path, target));
        }
      }
    }
  }

  let mut disabled = Vec::new();
  let mut enabled = Vec::new();
  for handle in session.tree.field_handles() {
    let Some(field) = session.tree.field_at_mut(handle.id) else {
      continue;
    };
    if named.contains(&handle.path) {
      if !field.auto_disabled {
        disabled.push(handle.path.clone());
      }
      field.disabled = true;
      field.auto_disabled = true;
      field.na_checked = false;
      field.invalid = None;
      field.value = sentinel_for(field);
    } else if field.auto_disabled {
      field.disabled = false;
      field.auto_disabled = false;
      enabled.push(handle.path.clone());
    }
  }
  (disabled, enabled)
}

pub fn value_matches(live: Option<&Value>, expected: &str) -> bool {
  let expected = expected.trim();
  match live {
    None | Some(Value::Null) => false,
    Some(Value::Array(items)) => items.iter().any(|item| value_matches(Some(item), expected)),
    Some(value) => scalar_text(value).trim() == expected,
  }
}

/// Runs queued and implied dependent initializations for freshly created
/// fields. Returns the paths whose options were initialized.
pub fn on_materialized(session: &mut FormSession, created: &[String]) -> Vec<String> {
  let mut initialized = Vec::new();

  let queued: Vec<(String, PendingInit)> =
    session.pending_inits.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
  for (affected, init) in queued {
    let targets: Vec<String> = resolve_related(&session.tree, &init.trigger_path, &affected)
      .into_iter()
      .filter(|t| created.contains(t))
      .collect();
    if targets.is_empty() {
      continue;
    }
    session.pending_inits.remove(&affected);
    let Some(rule) = rule_for(&session.triggers, &init.trigger_path, &affected) else {
      continue;
    };
    for target in targets {
      if recompute_field(session, &target, &rule, &init.trigger_value).is_some() {
        initialized.push(target);
      }
    }
  }

  for path in created {
    if initialized.contains(path) {
      continue;
    }
    let rules: Vec<(String, TriggerRule)> = session
      .triggers
      .iter()
      .flat_map(|(key, rules)| rules.iter().map(move |r| (key.clone(), r.clone())))
      .filter(|(_, rule)| path_candidates(path).contains(&rule.affected))
      .collect();
    for (key, rule) in rules {
      let Some(trigger_path) = resolve_related(&session.tree, path, &key).into_iter().next() else {
        continue;
      };
      let value = session.tree.field(&trigger_path).map(trigger_value).unwrap_or_default();
      if value.is_empty() {
        continue;
      }
      if recompute_field(session, path, &rule, &value).is_some() {
        initialized.push(path.clone());
      }
    }
  }

  for path in created {
    if trigger_key(&session.triggers, path).is_none() {
      continue;
    }
    let has_value = session.tree.field(path).is_some_and(|f| !trigger_value(f).is_empty());
    if has_value {
      let mut visited = BTreeSet::new();
      let mut outcome = ChangeOutcome::default();
      propagate(session, path, &mut visited, &mut outcome);
      for target in outcome.recomputed {
        if !initialized.contains(&target) {
          initialized.push(target);
        }
      }
    }
  }
  initialized
}

/// Recomputes every trigger in document order, then the rules.
pub fn refresh_all(session: &mut FormSession) -> ChangeOutcome {
  let mut outcome = ChangeOutcome::default();
  let mut visited = BTreeSet::new();
  for path in session.tree.field_paths() {
    if trigger_key(&session.triggers, &path).is_some() {
      propagate(session, &path, &mut visited, &mut outcome);
    }
  }
  let data = collect_form_data(&session.tree);
  let (disabled, enabled) = apply_conditional_rules(session, &data);
  outcome.disabled = disabled;
  outcome.enabled = enabled;
  outcome
}

fn rule_for(triggers: &TriggerMap, trigger_path: &str, affected: &str) -> Option<TriggerRule> {
  let key = trigger_key(triggers, trigger_path)?;
  triggers.get(&key)?.iter().find(|r| r.affected == affected).cloned()
}

/// Rendered fields an options key refers to, as seen from `anchor`: the exact
/// path, then the key re-indexed along the anchor's array positions, then a
/// sibling of the anchor, then every field the key matches.
pub fn resolve_related(tree: &FormTree, anchor: &str, key: &str) -> Vec<String> {
  let mut candidates = vec![key.to_string(), reindex(key, anchor)];
  if let Some((parent, _)) = anchor.rsplit_once('.') {
    candidates.push(join_path(parent, key));
  }
  for candidate in candidates {
    if tree.field(&candidate).is_some() {
      return vec![candidate];
    }
  }
  resolve_fields(tree, key)
}

/// Every rendered field an options key configures.
pub fn resolve_fields(tree: &FormTree, key: &str) -> Vec<String> {
  if tree.field(key).is_some() {
    return vec![key.to_string()];
  }
  let stripped = strip_indices(key);
  tree
    .field_paths()
    .into_iter()
    .filter(|path| {
      strip_indices(path) == stripped
        || (!stripped.contains('.') && path.rsplit('.').next() == Some(stripped.as_str()))
    })
    .collect()
}

fn reindex(key: &str, anchor: &str) -> String {
  let anchor: Vec<&str> = anchor.split('.').collect();
  let mut out: Vec<&str> = Vec::new();
  let mut cursor = 0;
  for segment in key.split('.') {
    if cursor < anchor.len() && anchor[cursor] == segment {
      out.push(segment);
      cursor += 1;
      while cursor < anchor.len() && anchor[cursor].parse::<usize>().is_ok() {
        out.push(anchor[cursor]);
        cursor += 1;
      }
    } else {
      cursor = anchor.len();
      out.push(segment);
    }
  }
  out.join(".")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reindex_follows_anchor_positions() {
    assert_eq!(reindex("items.state", "items.2.country"), "items.2.state");
    assert_eq!(reindex("state", "items.2.country"), "state");
  }

  #[test]
  fn exclusive_value_clears_others() {
    let exclusive = vec!["None".to_string()];
    let picked = toggle_selection(&["A".to_string(), "B".to_string()], "None", &exclusive);
    assert_eq!(picked, vec!["None".to_string()]);
    let picked = toggle_selection(&picked, "A", &exclusive);
    assert_eq!(picked, vec!["A".to_string()]);
  }

  #[test]
  fn array_values_match_when_any_element_does() {
    let live = serde_json::json!(["x", "yes"]);
    assert!(value_matches(Some(&live), " yes "));
    assert!(!value_matches(None, "yes"));
  }
}
