use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::collect::{self, collect_form_data, PopulateReport};
use crate::deps::{self, ChangeOutcome, PendingInit, TriggerMap};
use crate::form::{FieldValue, FormTree, NodeId, NodeKind};
use crate::options::{find_unmatched_keys, join_path, OptionsDocument, UnmatchedKey};
use crate::refs::definitions;
use crate::render::{materialize, Blueprint, FormPlan, Materialized, Renderer, DEFAULT_RECURSION_LIMIT};
use crate::schema::{analyze_with, normalize, AnalyzeOptions, SchemaAnalysis, DEFAULT_COLLAPSIBLE_THRESHOLD};
use crate::validate::{validate_document, validate_value, FormValidation, ValidationContext, ValidationResult};

#[derive(Debug, Error)]
pub enum FormError {
  #[error("failed to parse {role} JSON: {source}")]
  Parse {
    role: &'static str,
    #[source]
    source: serde_json::Error,
  },
  #[error("invalid options document: {0}")]
  Options(#[source] serde_json::Error),
  #[error("options use {} key(s) not found in the schema: {}", .0.len(), list_keys(.0))]
  UnmatchedOptionKeys(Vec<UnmatchedKey>),
  #[error("no field at path '{0}'")]
  UnknownField(String),
  #[error("field '{0}' is disabled")]
  FieldDisabled(String),
  #[error("'{value}' is not an option of '{path}'")]
  UnknownOption { path: String, value: String },
  #[error("no tab named '{0}'")]
  UnknownTab(String),
  #[error("no polymorphic selector at '{0}'")]
  UnknownSelector(String),
  #[error("variant {index} is out of range for '{path}' ({count} variant(s))")]
  VariantOutOfRange { path: String, index: usize, count: usize },
  #[error("no array at path '{0}'")]
  UnknownArray(String),
  #[error("item {index} is out of range for '{path}' ({len} item(s))")]
  ItemOutOfRange { path: String, index: usize, len: usize },
  #[error("failed to serialize form data: {0}")]
  Serialize(#[source] serde_json::Error),
}

fn list_keys(keys: &[UnmatchedKey]) -> String {
  keys
    .iter()
    .map(|k| format!("{} ({})", k.key, k.source))
    .collect::<Vec<_>>()
    .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
  pub recursion_limit: usize,
  pub collapsible_threshold: usize,
}

impl Default for SessionSettings {
  fn default() -> Self {
    Self { recursion_limit: DEFAULT_RECURSION_LIMIT, collapsible_threshold: DEFAULT_COLLAPSIBLE_THRESHOLD }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsLoad {
  Strict,
  ProceedAnyway,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tab {
  pub key: String,
  pub title: String,
  pub materialized: bool,
  pub node: Option<NodeId>,
}

/// The single active form: schema, options, derived maps and the rendered
/// tree. Loading a schema builds a new session; loading options rebuilds
/// the derived maps and re-renders.
#[derive(Debug, Clone)]
pub struct FormSession {
  pub schema: Value,
  pub definitions: Map<String, Value>,
  pub analysis: SchemaAnalysis,
  pub options: OptionsDocument,
  pub triggers: TriggerMap,
  pub exclusive: BTreeMap<String, Vec<String>>,
  pub tree: FormTree,
  pub tabs: Vec<Tab>,
  pub current_tab: Option<String>,
  pub tab_contents: BTreeMap<String, Blueprint>,
  pub pending_inits: BTreeMap<String, PendingInit>,
  pub is_populating: bool,
  pub settings: SessionSettings,
}

impl FormSession {
  pub fn new(schema: Value) -> Self {
    Self::with_settings(schema, SessionSettings::default())
  }

  pub fn with_settings(schema: Value, settings: SessionSettings) -> Self {
    let schema = normalize(&schema);
    let analysis = analyze_with(&schema, &AnalyzeOptions { collapsible_threshold: settings.collapsible_threshold });
    tracing::debug!(strategy = ?analysis.strategy, properties = analysis.property_count, "schema analyzed");
    let mut session = Self {
      definitions: definitions(&schema),
      schema,
      analysis,
      options: OptionsDocument::default(),
      triggers: TriggerMap::new(),
      exclusive: BTreeMap::new(),
      tree: FormTree::new(),
      tabs: Vec::new(),
      current_tab: None,
      tab_contents: BTreeMap::new(),
      pending_inits: BTreeMap::new(),
      is_populating: false,
      settings,
    };
    session.render();
    session
  }

  pub fn from_json_str(text: &str, settings: SessionSettings) -> Result<Self, FormError> {
    let schema: Value = serde_json::from_str(text).map_err(|source| FormError::Parse { role: "schema", source })?;
    Ok(Self::with_settings(schema, settings))
  }

  pub fn load_schema(&mut self, schema: Value) {
    *self = Self::with_settings(schema, self.settings);
  }

  pub fn check_options(&self, value: &Value) -> Result<Vec<UnmatchedKey>, FormError> {
    let doc = OptionsDocument::from_value(value).map_err(FormError::Options)?;
    Ok(find_unmatched_keys(&doc, &self.schema))
  }

  /// Installs an options document. Under `Strict` any key missing from the
  /// schema rejects the whole document and the session stays as it was.
  pub fn load_options(&mut self, value: &Value, mode: OptionsLoad) -> Result<Vec<UnmatchedKey>, FormError> {
    let doc = OptionsDocument::from_value(value).map_err(FormError::Options)?;
    let unmatched = find_unmatched_keys(&doc, &self.schema);
    if !unmatched.is_empty() {
      if mode == OptionsLoad::Strict {
        return Err(FormError::UnmatchedOptionKeys(unmatched));
      }
      tracing::warn!(count = unmatched.len(), "loading options with keys not found in the schema");
    }
    self.triggers = deps::build_trigger_map(&doc);
    self.exclusive = deps::build_exclusive_map(&doc);
    self.options = doc;
    self.render();
    Ok(unmatched)
  }

  pub fn load_options_str(&mut self, text: &str, mode: OptionsLoad) -> Result<Vec<UnmatchedKey>, FormError> {
    let value: Value = serde_json::from_str(text).map_err(|source| FormError::Parse { role: "options", source })?;
    self.load_options(&value, mode)
  }

  /// Clears and rebuilds the form. Tab contents are planned up front but only
  /// the first tab is materialized.
  pub fn render(&mut self) {
    self.tree.clear();
    self.tabs.clear();
    self.tab_contents.clear();
    self.pending_inits.clear();
    self.current_tab = None;

    let plan = Renderer::new(&self.schema, &self.options, self.settings.recursion_limit).plan(&self.analysis);
    match plan {
      FormPlan::Tabs { tabs } => {
        for tab in tabs {
          self.tabs.push(Tab { key: tab.key.clone(), title: tab.title, materialized: false, node: None });
          self.tab_contents.insert(tab.key, tab.content);
        }
        if let Some(first) = self.tabs.first().map(|t| t.key.clone()) {
          let _ = self.activate_tab(&first);
        }
      }
      FormPlan::Single { blueprints } => {
        let mut created = Vec::new();
        for blueprint in &blueprints {
          materialize(&mut self.tree, None, blueprint, &mut created);
        }
        self.after_materialize("", created);
      }
      FormPlan::Polymorphic { shared, selector } => {
        let mut created = Vec::new();
        for blueprint in &shared {
          materialize(&mut self.tree, None, blueprint, &mut created);
        }
        materialize(&mut self.tree, None, &selector, &mut created);
        self.after_materialize("", created);
      }
    }
  }

  pub fn activate_tab(&mut self, key: &str) -> Result<Materialized, FormError> {
    let idx = self
      .tabs
      .iter()
      .position(|t| t.key == key)
      .ok_or_else(|| FormError::UnknownTab(key.to_string()))?;
    self.current_tab = Some(key.to_string());
    self.materialize_tab(idx)
  }

  /// Materializes every tab not yet shown. Needed before whole-form
  /// collection, validation or export.
  pub fn render_all_tabs(&mut self) -> Vec<Materialized> {
    let mut out = Vec::new();
    for idx in 0..self.tabs.len() {
      if self.tabs[idx].materialized {
        continue;
      }
      if let Ok(receipt) = self.materialize_tab(idx) {
        out.push(receipt);
      }
    }
    out
  }

  fn materialize_tab(&mut self, idx: usize) -> Result<Materialized, FormError> {
    let key = self.tabs[idx].key.clone();
    if self.tabs[idx].materialized {
      return Ok(Materialized { scope: key, ..Materialized::default() });
    }
    let blueprint = self
      .tab_contents
      .get(&key)
      .cloned()
      .ok_or_else(|| FormError::UnknownTab(key.clone()))?;
    let mut created = Vec::new();
    let node = materialize(&mut self.tree, None, &blueprint, &mut created);
    let position = self.tabs[..idx].iter().filter(|t| t.materialized).count();
    self.tree.move_root(node, position);
    self.tabs[idx].materialized = true;
    self.tabs[idx].node = Some(node);
    tracing::debug!(tab = %key, fields = created.len(), "tab materialized");
    Ok(self.after_materialize(&key, created))
  }

  pub fn select_variant(&mut self, path: &str, index: usize) -> Result<Materialized, FormError> {
    let id = self
      .tree
      .selectors(path)
      .into_iter()
      .next()
      .ok_or_else(|| FormError::UnknownSelector(path.to_string()))?;
    self.select_variant_at(id, index)
  }

  pub fn select_variant_at(&mut self, id: NodeId, index: usize) -> Result<Materialized, FormError> {
    let created = self.select_inner(id, index)?;
    let scope = self.tree.node(id).map(|n| n.path.clone()).unwrap_or_default();
    Ok(self.after_materialize(&scope, created))
  }

  fn select_inner(&mut self, id: NodeId, index: usize) -> Result<Vec<String>, FormError> {
    let node = self.tree.node(id).ok_or_else(|| FormError::UnknownSelector(format!("#{}", id.0)))?;
    let NodeKind::Selector(selector) = &node.kind else {
      return Err(FormError::UnknownSelector(node.path.clone()));
    };
    let path = node.path.clone();
    let Some(variant) = selector.variants.get(index) else {
      return Err(FormError::VariantOutOfRange { path, index, count: selector.variants.len() });
    };
    if selector.selected == Some(index) {
      return Ok(Vec::new());
    }
    let variant = variant.schema.clone();
    let (level, depth) = (selector.level, selector.depth);

    self.tree.clear_children(id);
    if let Some(selector) = self.tree.selector_at_mut(id) {
      selector.selected = Some(index);
    }
    let blueprints = Renderer::new(&self.schema, &self.options, self.settings.recursion_limit)
      .plan_variant(&variant, &path, level, depth);
    let mut created = Vec::new();
    for blueprint in &blueprints {
      materialize(&mut self.tree, Some(id), blueprint, &mut created);
    }
    Ok(created)
  }

  pub fn add_array_item(&mut self, path: &str) -> Result<Materialized, FormError> {
    let id = self.tree.find(path).ok_or_else(|| FormError::UnknownArray(path.to_string()))?;
    let (item, index, depth) = match self.tree.node(id).map(|n| &n.kind) {
      Some(NodeKind::Array(array)) => (array.item.clone(), array.items.len(), array.depth),
      _ => return Err(FormError::UnknownArray(path.to_string())),
    };
    let blueprint =
      Renderer::new(&self.schema, &self.options, self.settings.recursion_limit).plan_array_item(path, index, &item, depth);
    let mut created = Vec::new();
    let item_id = materialize(&mut self.tree, Some(id), &blueprint, &mut created);
    if let Some(NodeKind::Array(array)) = self.tree.node_mut(id).map(|n| &mut n.kind) {
      array.items.push(item_id);
    }
    Ok(self.after_materialize(&join_path(path, &index.to_string()), created))
  }

  /// Removes one item and shifts later items down so indices stay gapless.
  pub fn remove_array_item(&mut self, path: &str, index: usize) -> Result<(), FormError> {
    let id = self.tree.find(path).ok_or_else(|| FormError::UnknownArray(path.to_string()))?;
    let items = match self.tree.node(id).map(|n| &n.kind) {
      Some(NodeKind::Array(array)) => array.items.clone(),
      _ => return Err(FormError::UnknownArray(path.to_string())),
    };
    let Some(doomed) = items.get(index).copied() else {
      return Err(FormError::ItemOutOfRange { path: path.to_string(), index, len: items.len() });
    };
    self.tree.remove_subtree(doomed);
    for (position, item_id) in items.iter().enumerate().skip(index + 1) {
      let old = join_path(path, &position.to_string());
      let new = join_path(path, &(position - 1).to_string());
      self.tree.repath_subtree(*item_id, &old, &new);
      if let Some(node) = self.tree.node_mut(*item_id) {
        node.label = format!("Item {position}");
      }
    }
    if let Some(NodeKind::Array(array)) = self.tree.node_mut(id).map(|n| &mut n.kind) {
      array.items.remove(index);
    }
    let data = collect_form_data(&self.tree);
    deps::apply_conditional_rules(self, &data);
    Ok(())
  }

  pub fn set_value(&mut self, path: &str, value: FieldValue) -> Result<ChangeOutcome, FormError> {
    let exclusive = self.exclusive_for(path);
    let field = self.tree.field_mut(path).ok_or_else(|| FormError::UnknownField(path.to_string()))?;
    if field.disabled {
      return Err(FormError::FieldDisabled(path.to_string()));
    }
    field.value = match value {
      FieldValue::Multi(list) => {
        let list = deps::select_in_order(&list, &exclusive);
        if list.is_empty() {
          FieldValue::Empty
        } else {
          FieldValue::Multi(list)
        }
      }
      FieldValue::Text(text) if text.trim().is_empty() => FieldValue::Empty,
      other => other,
    };
    field.na_checked = false;
    field.invalid = None;
    Ok(deps::handle_change(self, path))
  }

  /// Picks or unpicks one option of a choice control.
  pub fn toggle_option(&mut self, path: &str, option: &str) -> Result<ChangeOutcome, FormError> {
    let exclusive = self.exclusive_for(path);
    let field = self.tree.field_mut(path).ok_or_else(|| FormError::UnknownField(path.to_string()))?;
    if field.disabled {
      return Err(FormError::FieldDisabled(path.to_string()));
    }
    if !field.has_option(option) {
      return Err(FormError::UnknownOption { path: path.to_string(), value: option.to_string() });
    }
    field.value = if field.control.is_multi() {
      let next = deps::toggle_selection(&field.value.selections(), option, &exclusive);
      if next.is_empty() {
        FieldValue::Empty
      } else {
        FieldValue::Multi(next)
      }
    } else {
      FieldValue::Text(option.to_string())
    };
    field.na_checked = false;
    field.invalid = None;
    Ok(deps::handle_change(self, path))
  }

  pub fn set_na(&mut self, path: &str, checked: bool) -> Result<ChangeOutcome, FormError> {
    let field = self.tree.field_mut(path).ok_or_else(|| FormError::UnknownField(path.to_string()))?;
    if field.disabled {
      return Err(FormError::FieldDisabled(path.to_string()));
    }
    let Some(na) = &field.na else {
      return Err(FormError::UnknownOption { path: path.to_string(), value: "N/A".to_string() });
    };
    tracing::debug!(path, na = %na.value, checked, "toggling N/A");
    field.na_checked = checked;
    if checked {
      field.value = FieldValue::Empty;
      field.invalid = None;
    }
    Ok(deps::handle_change(self, path))
  }

  pub fn exclusive_for(&self, path: &str) -> Vec<String> {
    self
      .options
      .lookup_key(path)
      .and_then(|key| self.exclusive.get(key))
      .cloned()
      .unwrap_or_default()
  }

  /// Whole-form data. Materializes every tab first.
  pub fn collect_data(&mut self) -> Value {
    self.render_all_tabs();
    collect_form_data(&self.tree)
  }

  pub fn populate(&mut self, data: &Value) -> PopulateReport {
    collect::populate_form_with_data(self, data)
  }

  pub fn load_data_str(&mut self, text: &str) -> Result<PopulateReport, FormError> {
    let data: Value = serde_json::from_str(text).map_err(|source| FormError::Parse { role: "data", source })?;
    Ok(self.populate(&data))
  }

  pub fn validation_context(&self) -> ValidationContext<'_> {
    let mut ctx = ValidationContext::new(&self.schema, &self.options);
    for handle in self.tree.field_handles() {
      let Some(field) = self.tree.field_at(handle.id) else {
        continue;
      };
      if !handle.control.is_choice() || field.options.is_empty() {
        continue;
      }
      let mut allowed: Vec<String> = field.options.iter().map(|o| o.value.clone()).collect();
      if let Some(na) = &field.na {
        allowed.push(na.value.clone());
      }
      ctx.live_options.insert(handle.path, allowed);
    }
    ctx
  }

  pub fn validate(&mut self) -> FormValidation {
    let data = self.collect_data();
    let skip: BTreeSet<String> = self
      .tree
      .field_handles()
      .into_iter()
      .filter(|h| self.tree.field_at(h.id).is_some_and(|f| f.auto_disabled))
      .map(|h| h.path)
      .collect();
    validate_document(&data, &self.validation_context(), &skip)
  }

  pub fn validate_field(&self, path: &str) -> Result<ValidationResult, FormError> {
    let field = self.tree.field(path).ok_or_else(|| FormError::UnknownField(path.to_string()))?;
    let value = collect::field_json(field).unwrap_or(Value::Null);
    Ok(validate_value(&value, &field.schema, path, &self.validation_context()))
  }

  pub fn export_json(&mut self) -> Result<String, FormError> {
    let data = self.collect_data();
    serde_json::to_string_pretty(&data).map_err(FormError::Serialize)
  }

  pub fn invalid_fields(&self) -> Vec<String> {
    self
      .tree
      .field_handles()
      .into_iter()
      .filter(|h| self.tree.field_at(h.id).is_some_and(|f| f.is_invalid()))
      .map(|h| h.path)
      .collect()
  }

  /// Sole-variant selectors are selected as soon as they appear; dependent
  /// initialization and rules then run for everything created.
  fn after_materialize(&mut self, scope: &str, mut created: Vec<String>) -> Materialized {
    loop {
      let pending: Vec<NodeId> = self
        .tree
        .walk()
        .into_iter()
        .filter(|id| {
          self
            .tree
            .selector_at(*id)
            .is_some_and(|s| s.selected.is_none() && s.variants.len() == 1)
        })
        .collect();
      if pending.is_empty() {
        break;
      }
      for id in pending {
        match self.select_inner(id, 0) {
          Ok(more) => created.extend(more),
          Err(err) => {
            tracing::warn!(error = %err, "auto-selecting sole variant failed");
            if let Some(selector) = self.tree.selector_at_mut(id) {
              selector.selected = Some(0);
            }
          }
        }
      }
    }
    let initialized = deps::on_materialized(self, &created);
    let data = collect_form_data(&self.tree);
    deps::apply_conditional_rules(self, &data);
    Materialized { scope: scope.to_string(), fields: created, initialized }
  }
}
