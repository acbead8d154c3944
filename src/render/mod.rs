use serde::Serialize;
use serde_json::{json, Value};

use crate::form::{ArrayNode, ControlKind, Field, FieldValue, FormTree, ItemSchema, NodeId, NodeKind, Selector, Variant};
use crate::options::{join_path, scalar_text, EnumOption, FieldOptionConfig, InputControl, OptionsDocument};
use crate::refs::{is_root_ref, recursive_item_schema, ref_name, ref_of, resolve_ref, resolve_schema, RecursiveItems};
use crate::schema::{prettify_label, properties, required, schema_type, title_of, variants, RenderStrategy, SchemaAnalysis};

pub const DEFAULT_RECURSION_LIMIT: usize = 16;
const LONG_TEXT_THRESHOLD: u64 = 255;

/// A planned, not yet materialized piece of form. Tabs keep one of these in
/// their cache until first activation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "blueprint", rename_all = "snake_case")]
pub enum Blueprint {
  Group {
    path: String,
    label: String,
    description: Option<String>,
    collapsible: bool,
    children: Vec<Blueprint>,
  },
  Field {
    path: String,
    label: String,
    description: Option<String>,
    field: Field,
  },
  Array {
    path: String,
    label: String,
    description: Option<String>,
    item: ItemSchema,
    depth: usize,
  },
  Selector {
    path: String,
    label: String,
    description: Option<String>,
    variants: Vec<Variant>,
    level: usize,
    depth: usize,
  },
  Warning {
    path: String,
    message: String,
  },
}

impl Blueprint {
  pub fn path(&self) -> &str {
    match self {
      Blueprint::Group { path, .. }
      | Blueprint::Field { path, .. }
      | Blueprint::Array { path, .. }
      | Blueprint::Selector { path, .. }
      | Blueprint::Warning { path, .. } => path,
    }
  }

  fn warning(path: &str, message: impl Into<String>) -> Self {
    let message = message.into();
    tracing::warn!(path, message = %message, "rendering placeholder");
    Blueprint::Warning { path: path.to_string(), message }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct TabPlan {
  pub key: String,
  pub title: String,
  pub content: Blueprint,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum FormPlan {
  Tabs { tabs: Vec<TabPlan> },
  Single { blueprints: Vec<Blueprint> },
  Polymorphic { shared: Vec<Blueprint>, selector: Blueprint },
}

/// Receipt for a materialization step. Dependent initialization for the
/// listed fields has already run when this is returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Materialized {
  pub scope: String,
  pub fields: Vec<String>,
  pub initialized: Vec<String>,
}

pub struct Renderer<'a> {
  root: &'a Value,
  options: &'a OptionsDocument,
  recursion_limit: usize,
}

impl<'a> Renderer<'a> {
  pub fn new(root: &'a Value, options: &'a OptionsDocument, recursion_limit: usize) -> Self {
    Self { root, options, recursion_limit }
  }

  pub fn plan(&self, analysis: &SchemaAnalysis) -> FormPlan {
    let mut stack = Vec::new();
    match analysis.strategy {
      RenderStrategy::MultiSectionTabs => {
        let required = required(self.root);
        let tabs = properties(self.root)
          .map(|props| {
            props
              .iter()
              .map(|(key, node)| {
                let resolved = resolve_schema(node, self.root).unwrap_or_else(|| node.clone());
                TabPlan {
                  key: key.clone(),
                  title: title_of(&resolved, key),
                  content: self.plan_property(key, node, "", required.contains(key), 0, &mut stack, false),
                }
              })
              .collect()
          })
          .unwrap_or_default();
        FormPlan::Tabs { tabs }
      }
      RenderStrategy::PolymorphicSelector => {
        let shared = self.plan_properties(self.root, "", 0, &mut stack, false);
        let list = variants(self.root).cloned().unwrap_or_default();
        let selector = Blueprint::Selector {
          path: String::new(),
          label: title_of(self.root, "Type"),
          description: description(self.root),
          variants: variant_list(&list, self.root),
          level: 0,
          depth: 0,
        };
        FormPlan::Polymorphic { shared, selector }
      }
      strategy => {
        let collapsible = strategy == RenderStrategy::SingleFormCollapsible;
        let mut blueprints = self.plan_properties(self.root, "", 0, &mut stack, collapsible);
        if blueprints.is_empty() {
          blueprints.push(Blueprint::warning("", "schema has no renderable properties"));
        }
        FormPlan::Single { blueprints }
      }
    }
  }

  /// Plans every property of an already resolved object node, including
  /// properties contributed by `allOf` parts.
  pub fn plan_properties(
    &self,
    node: &Value,
    prefix: &str,
    depth: usize,
    stack: &mut Vec<String>,
    collapsible: bool,
  ) -> Vec<Blueprint> {
    let mut out = Vec::new();
    let required = required(node);
    if let Some(props) = properties(node) {
      for (name, child) in props {
        out.push(self.plan_property(name, child, prefix, required.contains(name), depth, stack, collapsible));
      }
    }
    if let Some(parts) = node.get("allOf").and_then(Value::as_array) {
      for part in parts {
        let Some(resolved) = resolve_schema(part, self.root) else {
          continue;
        };
        out.extend(self.plan_properties(&resolved, prefix, depth, stack, collapsible));
      }
    }
    out
  }

  #[allow(clippy::too_many_arguments)]
  pub fn plan_property(
    &self,
    name: &str,
    node: &Value,
    prefix: &str,
    is_required: bool,
    depth: usize,
    stack: &mut Vec<String>,
    collapsible: bool,
  ) -> Blueprint {
    let path = join_path(prefix, name);
    if depth > self.recursion_limit {
      return Blueprint::warning(&path, format!("nesting deeper than {} levels is not rendered", self.recursion_limit));
    }
    let reference = ref_of(node).map(str::to_string);
    if let Some(reference) = &reference {
      if is_root_ref(reference) || stack.contains(reference) {
        return Blueprint::warning(&path, format!("recursive reference {reference} is only expanded inside arrays"));
      }
    }
    let Some(resolved) = resolve_schema(node, self.root) else {
      return Blueprint::warning(&path, format!("unresolved reference {}", reference.unwrap_or_default()));
    };

    if let Some(reference) = &reference {
      stack.push(reference.clone());
    }
    let label = title_of(&resolved, name);
    let blueprint = self.plan_resolved(&path, label, &resolved, is_required, depth, stack, collapsible);
    if reference.is_some() {
      stack.pop();
    }
    blueprint
  }

  #[allow(clippy::too_many_arguments)]
  fn plan_resolved(
    &self,
    path: &str,
    label: String,
    resolved: &Value,
    is_required: bool,
    depth: usize,
    stack: &mut Vec<String>,
    collapsible: bool,
  ) -> Blueprint {
    let description = description(resolved);
    if let Some(list) = variants(resolved) {
      return Blueprint::Selector {
        path: path.to_string(),
        label,
        description,
        variants: variant_list(list, self.root),
        level: 0,
        depth,
      };
    }
    if properties(resolved).is_some() {
      return Blueprint::Group {
        path: path.to_string(),
        label,
        description,
        collapsible,
        children: self.plan_properties(resolved, path, depth + 1, stack, false),
      };
    }

    let is_array = schema_type(resolved) == Some("array") || resolved.get("items").is_some();
    if is_array {
      if let Some(item) = self.array_item_schema(path, resolved, stack) {
        return match item {
          Ok(item) => Blueprint::Array { path: path.to_string(), label, description, item, depth },
          Err(message) => Blueprint::warning(path, message),
        };
      }
    } else if !is_renderable_leaf(resolved) && self.options.lookup(path).is_none() {
      return Blueprint::warning(path, "unrecognized schema shape");
    }

    let mut field = self.plan_field(path, resolved);
    field.required = is_required;
    Blueprint::Field { path: path.to_string(), label, description, field }
  }

  /// `None` when the array holds primitives and renders as a single field.
  fn array_item_schema(&self, path: &str, node: &Value, stack: &[String]) -> Option<Result<ItemSchema, String>> {
    let items = node.get("items")?;
    if let Some(reference) = ref_of(items) {
      if is_root_ref(reference) {
        return Some(Ok(ItemSchema::Recursive));
      }
      if stack.iter().any(|r| r == reference) {
        return Some(Ok(ItemSchema::Deferred(reference.to_string())));
      }
      let Some(resolved) = resolve_schema(items, self.root) else {
        tracing::warn!(path, reference, "array items reference did not resolve");
        return Some(Err(format!("unresolved reference {reference}")));
      };
      return is_structured(&resolved).then(|| Ok(ItemSchema::Inline(resolved)));
    }
    is_structured(items).then(|| Ok(ItemSchema::Inline(items.clone())))
  }

  pub fn plan_field(&self, path: &str, schema: &Value) -> Field {
    let config = self.options.lookup(path);
    let control = match config {
      Some(config) => control_for_config(config, schema),
      None => control_for_schema(schema),
    };
    let mut field = Field::new(control, schema.clone());
    match config {
      Some(config) => {
        field.options = config.expanded_values();
        field.na = config.na_option();
        field.exclusive = config.exclusive_values.clone();
      }
      None => field.options = enum_options(schema),
    }
    field.value = default_value(schema, &field.control);
    field
  }

  /// Content of a selected polymorphic branch rendered at `prefix`.
  pub fn plan_variant(&self, variant: &Value, prefix: &str, level: usize, depth: usize) -> Vec<Blueprint> {
    if depth > self.recursion_limit {
      return vec![Blueprint::warning(prefix, "polymorphic nesting is too deep to render")];
    }
    let Some(resolved) = resolve_schema(variant, self.root) else {
      let reference = ref_of(variant).unwrap_or_default();
      return vec![Blueprint::warning(prefix, format!("unresolved reference {reference}"))];
    };
    let mut stack: Vec<String> = ref_of(variant).map(|r| vec![r.to_string()]).unwrap_or_default();

    let mut out = self.plan_properties(&resolved, prefix, depth + 1, &mut stack, false);
    if let Some(list) = variants(&resolved) {
      out.push(Blueprint::Selector {
        path: prefix.to_string(),
        label: title_of(&resolved, "Variant"),
        description: None,
        variants: variant_list(list, self.root),
        level: level + 1,
        depth: depth + 1,
      });
    }
    if out.is_empty() {
      if prefix.is_empty() {
        out.push(Blueprint::warning(prefix, "primitive branches at the form root are not editable"));
      } else {
        out.push(Blueprint::Field {
          path: prefix.to_string(),
          label: title_of(&resolved, "Value"),
          description: description(&resolved),
          field: self.plan_field(prefix, &resolved),
        });
      }
    }
    out
  }

  pub fn plan_array_item(&self, array_path: &str, index: usize, item: &ItemSchema, depth: usize) -> Blueprint {
    let path = join_path(array_path, &index.to_string());
    let label = format!("Item {}", index + 1);
    if depth >= self.recursion_limit {
      return Blueprint::warning(&path, format!("array nesting deeper than {} levels is not rendered", self.recursion_limit));
    }
    match item {
      ItemSchema::Inline(schema) => self.plan_item_schema(&path, label, schema, depth, Vec::new()),
      ItemSchema::Deferred(reference) => match resolve_ref(reference, self.root) {
        Some(target) => {
          let target = target.clone();
          self.plan_item_schema(&path, label, &target, depth, vec![reference.clone()])
        }
        None => Blueprint::warning(&path, format!("unresolved reference {reference}")),
      },
      ItemSchema::Recursive => match recursive_item_schema(self.root) {
        Some(RecursiveItems::Variants(list)) => Blueprint::Selector {
          path,
          label,
          description: None,
          variants: variant_list(&list, self.root),
          level: 0,
          depth: depth + 1,
        },
        Some(RecursiveItems::Properties(props)) => {
          let synthetic = json!({ "type": "object", "properties": props, "required": required(self.root) });
          let mut stack = Vec::new();
          Blueprint::Group {
            children: self.plan_properties(&synthetic, &path, depth + 1, &mut stack, false),
            path,
            label,
            description: None,
            collapsible: false,
          }
        }
        None => Blueprint::warning(&path, "recursive items found nothing to expand at the schema root"),
      },
    }
  }

  fn plan_item_schema(&self, path: &str, label: String, schema: &Value, depth: usize, mut stack: Vec<String>) -> Blueprint {
    let resolved = resolve_schema(schema, self.root).unwrap_or_else(|| schema.clone());
    if let Some(list) = variants(&resolved) {
      return Blueprint::Selector {
        path: path.to_string(),
        label,
        description: description(&resolved),
        variants: variant_list(list, self.root),
        level: 0,
        depth: depth + 1,
      };
    }
    if properties(&resolved).is_some() {
      return Blueprint::Group {
        path: path.to_string(),
        label,
        description: description(&resolved),
        collapsible: false,
        children: self.plan_properties(&resolved, path, depth + 1, &mut stack, false),
      };
    }
    Blueprint::Field { path: path.to_string(), label, description: None, field: self.plan_field(path, &resolved) }
  }
}

/// Inserts a blueprint under `parent`, appending created field paths.
pub fn materialize(tree: &mut FormTree, parent: Option<NodeId>, blueprint: &Blueprint, created: &mut Vec<String>) -> NodeId {
  match blueprint {
    Blueprint::Group { path, label, description, collapsible, children } => {
      let id = tree.insert(parent, path, label, description.clone(), NodeKind::Group { collapsible: *collapsible });
      for child in children {
        materialize(tree, Some(id), child, created);
      }
      id
    }
    Blueprint::Field { path, label, description, field } => {
      created.push(path.clone());
      tree.insert(parent, path, label, description.clone(), NodeKind::Field(field.clone()))
    }
    Blueprint::Array { path, label, description, item, depth } => tree.insert(
      parent,
      path,
      label,
      description.clone(),
      NodeKind::Array(ArrayNode { item: item.clone(), items: Vec::new(), depth: *depth }),
    ),
    Blueprint::Selector { path, label, description, variants, level, depth } => tree.insert(
      parent,
      path,
      label,
      description.clone(),
      NodeKind::Selector(Selector { variants: variants.clone(), selected: None, level: *level, depth: *depth }),
    ),
    Blueprint::Warning { path, message } => {
      tree.insert(parent, path, "Warning", None, NodeKind::Warning { message: message.clone() })
    }
  }
}

pub fn variant_list(list: &[Value], root: &Value) -> Vec<Variant> {
  list
    .iter()
    .enumerate()
    .map(|(idx, schema)| Variant { title: variant_title(schema, root, idx), schema: schema.clone() })
    .collect()
}

fn variant_title(schema: &Value, root: &Value, idx: usize) -> String {
  if let Some(title) = schema.get("title").and_then(Value::as_str) {
    return title.to_string();
  }
  if let Some(title) = resolve_schema(schema, root)
    .as_ref()
    .and_then(|s| s.get("title"))
    .and_then(Value::as_str)
  {
    return title.to_string();
  }
  if let Some(reference) = ref_of(schema) {
    return prettify_label(ref_name(reference));
  }
  if let Some(ty) = schema_type(schema) {
    return prettify_label(ty);
  }
  format!("Option {}", idx + 1)
}

pub fn control_for_config(config: &FieldOptionConfig, schema: &Value) -> ControlKind {
  match config.control() {
    InputControl::DropDown if config.is_multi() => ControlKind::MultiSelect,
    InputControl::DropDown => ControlKind::Dropdown,
    InputControl::MultiSelect => ControlKind::MultiSelect,
    InputControl::Checkboxes => ControlKind::CheckboxGroup,
    InputControl::Radio => ControlKind::RadioGroup,
    InputControl::Slider => ControlKind::Slider {
      min: config.min.or_else(|| number(schema, "minimum")).unwrap_or(0.0),
      max: config.max.or_else(|| number(schema, "maximum")).unwrap_or(100.0),
      step: config.step.unwrap_or(1.0),
    },
    InputControl::DateTimePicker => match schema.get("format").and_then(Value::as_str) {
      Some("date") => ControlKind::Date,
      _ => ControlKind::DateTime,
    },
    InputControl::Text => control_for_schema(schema),
  }
}

pub fn control_for_schema(schema: &Value) -> ControlKind {
  let has_enum = schema.get("enum").and_then(Value::as_array).is_some_and(|e| !e.is_empty());
  match schema_type(schema) {
    Some("boolean") => ControlKind::Checkbox,
    Some("integer") if !has_enum => ControlKind::Number {
      integer: true,
      minimum: number(schema, "minimum"),
      maximum: number(schema, "maximum"),
    },
    Some("number") if !has_enum => ControlKind::Number {
      integer: false,
      minimum: number(schema, "minimum"),
      maximum: number(schema, "maximum"),
    },
    Some("array") => {
      let item_enum = schema
        .get("items")
        .and_then(|items| items.get("enum"))
        .and_then(Value::as_array)
        .is_some_and(|e| !e.is_empty());
      if item_enum {
        ControlKind::MultiSelect
      } else {
        ControlKind::TextArea { comma_list: true }
      }
    }
    _ if has_enum => ControlKind::Dropdown,
    _ => match schema.get("format").and_then(Value::as_str) {
      Some("date") => ControlKind::Date,
      Some("date-time") => ControlKind::DateTime,
      Some("textarea") => ControlKind::TextArea { comma_list: false },
      _ if schema.get("maxLength").and_then(Value::as_u64).is_some_and(|n| n > LONG_TEXT_THRESHOLD) => {
        ControlKind::TextArea { comma_list: false }
      }
      _ => ControlKind::Text,
    },
  }
}

pub fn enum_options(schema: &Value) -> Vec<EnumOption> {
  let list = schema
    .get("enum")
    .or_else(|| schema.get("items").and_then(|items| items.get("enum")))
    .and_then(Value::as_array);
  list
    .map(|values| values.iter().map(|v| EnumOption::new(scalar_text(v))).collect())
    .unwrap_or_default()
}

fn default_value(schema: &Value, control: &ControlKind) -> FieldValue {
  match schema.get("default") {
    None | Some(Value::Null) => FieldValue::Empty,
    Some(Value::Bool(b)) => FieldValue::Flag(*b),
    Some(Value::Array(items)) => {
      let items: Vec<String> = items.iter().map(scalar_text).collect();
      if control.is_multi() {
        FieldValue::Multi(items)
      } else {
        FieldValue::Text(items.join(", "))
      }
    }
    Some(other) => FieldValue::Text(scalar_text(other)),
  }
}

fn description(node: &Value) -> Option<String> {
  node.get("description").and_then(Value::as_str).map(str::to_string)
}

fn number(schema: &Value, key: &str) -> Option<f64> {
  schema.get(key).and_then(Value::as_f64)
}

fn is_structured(node: &Value) -> bool {
  properties(node).is_some() || variants(node).is_some()
}

fn is_renderable_leaf(node: &Value) -> bool {
  schema_type(node).is_some_and(|t| t != "object")
    || node.get("enum").is_some()
    || node.get("const").is_some()
    || node.get("format").is_some()
}
