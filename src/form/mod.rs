use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::options::EnumOption;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlKind {
  Text,
  TextArea { comma_list: bool },
  Number { integer: bool, minimum: Option<f64>, maximum: Option<f64> },
  Date,
  DateTime,
  Checkbox,
  Dropdown,
  MultiSelect,
  CheckboxGroup,
  RadioGroup,
  Slider { min: f64, max: f64, step: f64 },
}

impl ControlKind {
  pub fn is_choice(&self) -> bool {
    matches!(
      self,
      ControlKind::Dropdown | ControlKind::MultiSelect | ControlKind::CheckboxGroup | ControlKind::RadioGroup
    )
  }

  pub fn is_multi(&self) -> bool {
    matches!(self, ControlKind::MultiSelect | ControlKind::CheckboxGroup)
  }

  pub fn is_numeric(&self) -> bool {
    matches!(self, ControlKind::Number { .. } | ControlKind::Slider { .. })
  }

  pub fn name(&self) -> &'static str {
    match self {
      ControlKind::Text => "text",
      ControlKind::TextArea { .. } => "textarea",
      ControlKind::Number { .. } => "number",
      ControlKind::Date => "date",
      ControlKind::DateTime => "datetime",
      ControlKind::Checkbox => "checkbox",
      ControlKind::Dropdown => "dropdown",
      ControlKind::MultiSelect => "multi-select",
      ControlKind::CheckboxGroup => "checkbox-group",
      ControlKind::RadioGroup => "radio-group",
      ControlKind::Slider { .. } => "slider",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
  Empty,
  Text(String),
  Flag(bool),
  Multi(Vec<String>),
}

impl FieldValue {
  pub fn is_empty(&self) -> bool {
    match self {
      FieldValue::Empty => true,
      FieldValue::Text(s) => s.trim().is_empty(),
      FieldValue::Flag(_) => false,
      FieldValue::Multi(list) => list.is_empty(),
    }
  }

  /// Selected values as strings: a text value is a one-element selection.
  pub fn selections(&self) -> Vec<String> {
    match self {
      FieldValue::Empty => Vec::new(),
      FieldValue::Text(s) if s.is_empty() => Vec::new(),
      FieldValue::Text(s) => vec![s.clone()],
      FieldValue::Flag(b) => vec![b.to_string()],
      FieldValue::Multi(list) => list.clone(),
    }
  }

  /// Parses user input the way the control would receive it.
  pub fn from_input(control: &ControlKind, raw: &str) -> Self {
    let raw = raw.trim();
    if raw.is_empty() {
      return FieldValue::Empty;
    }
    match control {
      ControlKind::Checkbox => FieldValue::Flag(matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
      )),
      c if c.is_multi() => FieldValue::Multi(
        raw
          .split(',')
          .map(str::trim)
          .filter(|s| !s.is_empty())
          .map(str::to_string)
          .collect(),
      ),
      _ => FieldValue::Text(raw.to_string()),
    }
  }

  pub fn display(&self) -> String {
    match self {
      FieldValue::Empty => String::new(),
      FieldValue::Text(s) => s.clone(),
      FieldValue::Flag(b) => b.to_string(),
      FieldValue::Multi(list) => list.join(", "),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Field {
  pub control: ControlKind,
  pub schema: Value,
  pub required: bool,
  pub value: FieldValue,
  pub options: Vec<EnumOption>,
  pub na: Option<EnumOption>,
  pub na_checked: bool,
  pub exclusive: Vec<String>,
  pub disabled: bool,
  pub auto_disabled: bool,
  /// Loaded values that were not among the options at load time.
  pub invalid: Option<Vec<String>>,
}

impl Field {
  pub fn new(control: ControlKind, schema: Value) -> Self {
    Self {
      control,
      schema,
      required: false,
      value: FieldValue::Empty,
      options: Vec::new(),
      na: None,
      na_checked: false,
      exclusive: Vec::new(),
      disabled: false,
      auto_disabled: false,
      invalid: None,
    }
  }

  pub fn has_option(&self, value: &str) -> bool {
    self.options.iter().any(|o| o.value == value)
  }

  pub fn label_for(&self, value: &str) -> Option<&str> {
    self.options.iter().find(|o| o.value == value).map(|o| o.label.as_str())
  }

  pub fn is_invalid(&self) -> bool {
    self.invalid.as_ref().is_some_and(|v| !v.is_empty())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "schema", rename_all = "snake_case")]
pub enum ItemSchema {
  Inline(Value),
  /// `$ref: "#"`: expands to the root's variants or properties when added.
  Recursive,
  /// A `$ref` already being expanded higher up; resolved when added.
  Deferred(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ArrayNode {
  pub item: ItemSchema,
  pub items: Vec<NodeId>,
  pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Variant {
  pub title: String,
  pub schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Selector {
  pub variants: Vec<Variant>,
  pub selected: Option<usize>,
  pub level: usize,
  pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum NodeKind {
  Group { collapsible: bool },
  Field(Field),
  Array(ArrayNode),
  Selector(Selector),
  Warning { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Node {
  pub id: NodeId,
  pub path: String,
  pub label: String,
  pub description: Option<String>,
  pub parent: Option<NodeId>,
  pub children: Vec<NodeId>,
  pub kind: NodeKind,
}

/// Tagged handle to a rendered control: what the collector, populator and
/// dependency engine use instead of matching on ids or class names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldHandle {
  pub id: NodeId,
  pub path: String,
  pub control: ControlKind,
}

/// Arena of rendered nodes. Paths of groups, arrays and fields are unique;
/// selectors share the data path of their content and are looked up by scan.
#[derive(Debug, Clone, Default)]
pub struct FormTree {
  nodes: Vec<Option<Node>>,
  roots: Vec<NodeId>,
  by_path: BTreeMap<String, NodeId>,
}

impl FormTree {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn clear(&mut self) {
    self.nodes.clear();
    self.roots.clear();
    self.by_path.clear();
  }

  pub fn is_empty(&self) -> bool {
    self.roots.is_empty()
  }

  pub fn insert(
    &mut self,
    parent: Option<NodeId>,
    path: &str,
    label: &str,
    description: Option<String>,
    kind: NodeKind,
  ) -> NodeId {
    let indexed = !matches!(kind, NodeKind::Selector(_)) && !path.is_empty();
    if indexed {
      if let Some(existing) = self.by_path.get(path).copied() {
        tracing::warn!(path, "replacing node already rendered at this path");
        self.remove_subtree(existing);
      }
    }
    let id = NodeId(self.nodes.len());
    self.nodes.push(Some(Node {
      id,
      path: path.to_string(),
      label: label.to_string(),
      description,
      parent,
      children: Vec::new(),
      kind,
    }));
    if indexed {
      self.by_path.insert(path.to_string(), id);
    }
    match parent.and_then(|p| self.node_mut(p)) {
      Some(parent_node) => parent_node.children.push(id),
      None => self.roots.push(id),
    }
    id
  }

  pub fn node(&self, id: NodeId) -> Option<&Node> {
    self.nodes.get(id.0).and_then(Option::as_ref)
  }

  pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
    self.nodes.get_mut(id.0).and_then(Option::as_mut)
  }

  pub fn roots(&self) -> &[NodeId] {
    &self.roots
  }

  pub fn move_root(&mut self, id: NodeId, position: usize) {
    let Some(current) = self.roots.iter().position(|r| *r == id) else {
      return;
    };
    self.roots.remove(current);
    let position = position.min(self.roots.len());
    self.roots.insert(position, id);
  }

  pub fn children(&self, id: NodeId) -> &[NodeId] {
    self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
  }

  pub fn find(&self, path: &str) -> Option<NodeId> {
    self.by_path.get(path).copied()
  }

  pub fn field(&self, path: &str) -> Option<&Field> {
    self.find(path).and_then(|id| self.field_at(id))
  }

  pub fn field_mut(&mut self, path: &str) -> Option<&mut Field> {
    let id = self.find(path)?;
    self.field_at_mut(id)
  }

  pub fn field_at(&self, id: NodeId) -> Option<&Field> {
    match &self.node(id)?.kind {
      NodeKind::Field(field) => Some(field),
      _ => None,
    }
  }

  pub fn field_at_mut(&mut self, id: NodeId) -> Option<&mut Field> {
    match &mut self.node_mut(id)?.kind {
      NodeKind::Field(field) => Some(field),
      _ => None,
    }
  }

  pub fn array(&self, path: &str) -> Option<&ArrayNode> {
    match &self.node(self.find(path)?)?.kind {
      NodeKind::Array(array) => Some(array),
      _ => None,
    }
  }

  pub fn selector_at(&self, id: NodeId) -> Option<&Selector> {
    match &self.node(id)?.kind {
      NodeKind::Selector(selector) => Some(selector),
      _ => None,
    }
  }

  pub fn selector_at_mut(&mut self, id: NodeId) -> Option<&mut Selector> {
    match &mut self.node_mut(id)?.kind {
      NodeKind::Selector(selector) => Some(selector),
      _ => None,
    }
  }

  /// Selectors bound to `path`, outermost first.
  pub fn selectors(&self, path: &str) -> Vec<NodeId> {
    let mut found: Vec<(usize, NodeId)> = self
      .walk()
      .into_iter()
      .filter_map(|id| {
        let node = self.node(id)?;
        match &node.kind {
          NodeKind::Selector(sel) if node.path == path => Some((sel.level, id)),
          _ => None,
        }
      })
      .collect();
    found.sort();
    found.into_iter().map(|(_, id)| id).collect()
  }

  pub fn handle(&self, path: &str) -> Option<FieldHandle> {
    let id = self.find(path)?;
    let field = self.field_at(id)?;
    Some(FieldHandle { id, path: path.to_string(), control: field.control.clone() })
  }

  /// Field handles in document order.
  pub fn field_handles(&self) -> Vec<FieldHandle> {
    self
      .walk()
      .into_iter()
      .filter_map(|id| {
        let node = self.node(id)?;
        match &node.kind {
          NodeKind::Field(field) => Some(FieldHandle { id, path: node.path.clone(), control: field.control.clone() }),
          _ => None,
        }
      })
      .collect()
  }

  pub fn field_paths(&self) -> Vec<String> {
    self.field_handles().into_iter().map(|h| h.path).collect()
  }

  /// Depth-first, document order.
  pub fn walk(&self) -> Vec<NodeId> {
    let mut out = Vec::new();
    for root in &self.roots {
      self.walk_from(*root, &mut out);
    }
    out
  }

  pub fn walk_from(&self, id: NodeId, out: &mut Vec<NodeId>) {
    let Some(node) = self.node(id) else {
      return;
    };
    out.push(id);
    for child in &node.children {
      self.walk_from(*child, out);
    }
  }

  pub fn clear_children(&mut self, id: NodeId) {
    let children = self.children(id).to_vec();
    for child in children {
      self.remove_subtree(child);
    }
  }

  pub fn remove_subtree(&mut self, id: NodeId) {
    let mut doomed = Vec::new();
    self.walk_from(id, &mut doomed);
    let parent = self.node(id).and_then(|n| n.parent);
    match parent.and_then(|p| self.node_mut(p)) {
      Some(parent_node) => parent_node.children.retain(|c| *c != id),
      None => self.roots.retain(|c| *c != id),
    }
    for node_id in doomed {
      if let Some(node) = self.nodes.get_mut(node_id.0).and_then(Option::take) {
        if self.by_path.get(&node.path) == Some(&node_id) {
          self.by_path.remove(&node.path);
        }
      }
    }
  }

  /// Rewrites the `old` path prefix to `new` on a subtree and re-indexes it.
  pub fn repath_subtree(&mut self, id: NodeId, old: &str, new: &str) {
    let mut ids = Vec::new();
    self.walk_from(id, &mut ids);
    for node_id in ids {
      let Some(node) = self.node_mut(node_id) else {
        continue;
      };
      let Some(rest) = node.path.strip_prefix(old) else {
        continue;
      };
      if !rest.is_empty() && !rest.starts_with('.') {
        continue;
      }
      let renamed = format!("{new}{rest}");
      let previous = std::mem::replace(&mut node.path, renamed);
      let updated = node.path.clone();
      let indexed = !matches!(node.kind, NodeKind::Selector(_));
      if indexed {
        if self.by_path.get(&previous) == Some(&node_id) {
          self.by_path.remove(&previous);
        }
        self.by_path.insert(updated, node_id);
      }
    }
  }

  /// Top-level section a path belongs to.
  pub fn section_of(path: &str) -> &str {
    path.split('.').next().unwrap_or("")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn text_field() -> NodeKind {
    NodeKind::Field(Field::new(ControlKind::Text, json!({ "type": "string" })))
  }

  #[test]
  fn reinserting_a_path_replaces_the_old_node() {
    let mut tree = FormTree::new();
    let first = tree.insert(None, "name", "Name", None, text_field());
    let second = tree.insert(None, "name", "Name", None, text_field());
    assert_ne!(first, second);
    assert_eq!(tree.find("name"), Some(second));
    assert_eq!(tree.roots(), &[second]);
  }

  #[test]
  fn repath_moves_index_entries() {
    let mut tree = FormTree::new();
    let group = tree.insert(None, "items.1", "Item 2", None, NodeKind::Group { collapsible: false });
    tree.insert(Some(group), "items.1.name", "Name", None, text_field());
    tree.repath_subtree(group, "items.1", "items.0");
    assert!(tree.find("items.1.name").is_none());
    assert!(tree.field("items.0.name").is_some());
  }
}
