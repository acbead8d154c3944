use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::refs::{is_root_ref, ref_of, resolve_ref, resolve_schema};

pub const DEFAULT_COLLAPSIBLE_THRESHOLD: usize = 15;
const NESTED_FORM_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderStrategy {
  PolymorphicSelector,
  MultiSectionTabs,
  DynamicRecursive,
  SingleFormNested,
  SingleFormFlat,
  SingleFormCollapsible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyClass {
  ComplexReference,
  InlineObject,
  Primitive,
  Array,
  Polymorphic,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyInfo {
  pub name: String,
  pub class: PropertyClass,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaAnalysis {
  pub strategy: RenderStrategy,
  pub property_count: usize,
  pub max_depth: usize,
  pub has_recursion: bool,
  pub root_polymorphic: bool,
  pub has_nested_objects: bool,
  pub use_tabs: bool,
  pub complex_references: usize,
  pub inline_objects: usize,
  pub primitives: usize,
  pub arrays: usize,
  pub polymorphic: usize,
  pub properties: Vec<PropertyInfo>,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
  pub collapsible_threshold: usize,
}

impl Default for AnalyzeOptions {
  fn default() -> Self {
    Self { collapsible_threshold: DEFAULT_COLLAPSIBLE_THRESHOLD }
  }
}

/// Moves properties found under a `$Defs` wrapper, or under the only member
/// of `$defs`/`definitions`, up to the root. Schemas that already carry root
/// properties (or a root `oneOf`/`anyOf`) come back unchanged.
pub fn normalize(schema: &Value) -> Value {
  let Value::Object(root) = schema else {
    tracing::warn!("schema root is not an object; treating it as empty");
    return json!({ "type": "object", "properties": {} });
  };
  if properties(schema).is_some() || variants(schema).is_some() {
    return schema.clone();
  }

  let Some((source, found)) = find_relocatable(root) else {
    tracing::warn!("schema has no root properties; rendering an empty form");
    return schema.clone();
  };
  tracing::debug!(source, "relocating nested properties to the schema root");

  let mut out = root.clone();
  if let Some(props) = found.get("properties") {
    out.insert("properties".to_string(), props.clone());
  }
  for key in ["required", "title", "description"] {
    if let Some(value) = found.get(key) {
      out.entry(key.to_string()).or_insert_with(|| value.clone());
    }
  }
  out.entry("type".to_string()).or_insert_with(|| json!("object"));

  if let Some(Value::Object(legacy)) = out.remove("$Defs") {
    let defs = out
      .entry("$defs".to_string())
      .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(defs) = defs {
      for (name, def) in legacy {
        if name != "properties" && name != "required" {
          defs.entry(name).or_insert(def);
        }
      }
    }
  }
  Value::Object(out)
}

pub fn analyze(schema: &Value) -> SchemaAnalysis {
  analyze_with(schema, &AnalyzeOptions::default())
}

pub fn analyze_with(schema: &Value, options: &AnalyzeOptions) -> SchemaAnalysis {
  let props = properties(schema).cloned().unwrap_or_default();
  let root_polymorphic = variants(schema).is_some();

  let mut infos = Vec::new();
  for (name, node) in &props {
    infos.push(PropertyInfo { name: name.clone(), class: classify_property(node, schema) });
  }
  let count = |class: PropertyClass| infos.iter().filter(|p| p.class == class).count();
  let complex_references = count(PropertyClass::ComplexReference);
  let inline_objects = count(PropertyClass::InlineObject);
  let primitives = count(PropertyClass::Primitive);
  let arrays = count(PropertyClass::Array);
  let polymorphic = count(PropertyClass::Polymorphic);
  let property_count = infos.len();

  let mut walker = DepthWalker { root: schema, stack: Vec::new(), recursion: false };
  let max_depth = walker.depth(schema);
  let has_recursion = walker.recursion;

  let has_nested_objects = complex_references + inline_objects > 0
    || props.values().any(|node| array_of_objects(node, schema));

  let use_tabs = should_use_tabs(property_count, complex_references + inline_objects, primitives, polymorphic);

  let strategy = if root_polymorphic && property_count == 0 {
    RenderStrategy::PolymorphicSelector
  } else if use_tabs {
    RenderStrategy::MultiSectionTabs
  } else if root_polymorphic {
    RenderStrategy::PolymorphicSelector
  } else if has_recursion {
    RenderStrategy::DynamicRecursive
  } else if has_nested_objects && property_count <= NESTED_FORM_LIMIT {
    RenderStrategy::SingleFormNested
  } else if property_count > options.collapsible_threshold {
    RenderStrategy::SingleFormCollapsible
  } else {
    RenderStrategy::SingleFormFlat
  };

  SchemaAnalysis {
    strategy,
    property_count,
    max_depth,
    has_recursion,
    root_polymorphic,
    has_nested_objects,
    use_tabs,
    complex_references,
    inline_objects,
    primitives,
    arrays,
    polymorphic,
    properties: infos,
  }
}

/// Tabs pay off for mixed-complexity schemas. A schema made only of
/// primitives and selectors never gets tabs, however long it is.
pub fn should_use_tabs(total: usize, complex: usize, primitives: usize, polymorphic: usize) -> bool {
  if total == 0 || primitives + polymorphic == total {
    return false;
  }
  if complex >= 2 {
    return true;
  }
  if total >= 6 && complex >= 1 {
    return true;
  }
  total >= 10 && primitives < 8
}

pub fn classify_property(node: &Value, root: &Value) -> PropertyClass {
  if variants(node).is_some() {
    return PropertyClass::Polymorphic;
  }
  if let Some(reference) = ref_of(node) {
    if is_root_ref(reference) {
      return PropertyClass::ComplexReference;
    }
    let Some(target) = resolve_schema(node, root) else {
      tracing::warn!(reference, "property $ref did not resolve; treating as primitive");
      return PropertyClass::Primitive;
    };
    return match classify_inline(&target) {
      PropertyClass::InlineObject => PropertyClass::ComplexReference,
      other => other,
    };
  }
  classify_inline(node)
}

fn classify_inline(node: &Value) -> PropertyClass {
  if variants(node).is_some() {
    return PropertyClass::Polymorphic;
  }
  match schema_type(node) {
    Some("array") => PropertyClass::Array,
    Some("object") if properties(node).is_some() => PropertyClass::InlineObject,
    None if node.get("items").is_some() => PropertyClass::Array,
    None if properties(node).is_some() => PropertyClass::InlineObject,
    _ => PropertyClass::Primitive,
  }
}

fn array_of_objects(node: &Value, root: &Value) -> bool {
  let node = resolve_schema(node, root).unwrap_or_else(|| node.clone());
  let Some(items) = node.get("items") else {
    return false;
  };
  if ref_of(items).is_some_and(is_root_ref) {
    return true;
  }
  let items = resolve_schema(items, root).unwrap_or_else(|| items.clone());
  properties(&items).is_some() || variants(&items).is_some()
}

struct DepthWalker<'a> {
  root: &'a Value,
  stack: Vec<String>,
  recursion: bool,
}

impl DepthWalker<'_> {
  fn depth(&mut self, node: &Value) -> usize {
    if let Some(reference) = ref_of(node) {
      if is_root_ref(reference) || self.stack.iter().any(|r| r == reference) {
        self.recursion = true;
        return 0;
      }
      let Some(target) = resolve_ref(reference, self.root) else {
        return 0;
      };
      self.stack.push(reference.to_string());
      let depth = self.depth(target);
      self.stack.pop();
      return depth;
    }

    let mut deepest = 0;
    let mut nests = false;
    if let Some(props) = properties(node) {
      nests = true;
      for child in props.values() {
        deepest = deepest.max(self.depth(child));
      }
    }
    for key in ["oneOf", "anyOf", "allOf"] {
      if let Some(list) = node.get(key).and_then(Value::as_array) {
        for child in list {
          deepest = deepest.max(self.depth(child));
        }
      }
    }
    if let Some(items) = node.get("items") {
      let inner = self.depth(items);
      if inner > 0 || self.recursion {
        nests = true;
      }
      deepest = deepest.max(inner);
    }
    if nests {
      deepest + 1
    } else {
      deepest
    }
  }
}

pub fn schema_type(node: &Value) -> Option<&str> {
  match node.get("type")? {
    Value::String(s) => Some(s.as_str()),
    Value::Array(list) => list.iter().filter_map(Value::as_str).find(|t| *t != "null"),
    _ => None,
  }
}

pub fn properties(node: &Value) -> Option<&Map<String, Value>> {
  node
    .get("properties")
    .and_then(Value::as_object)
    .filter(|props| !props.is_empty())
}

/// The `oneOf` (preferred) or `anyOf` list of a node, when non-empty.
pub fn variants(node: &Value) -> Option<&Vec<Value>> {
  ["oneOf", "anyOf"]
    .iter()
    .filter_map(|key| node.get(*key).and_then(Value::as_array))
    .find(|list| !list.is_empty())
}

pub fn required(node: &Value) -> Vec<String> {
  node
    .get("required")
    .and_then(Value::as_array)
    .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
    .unwrap_or_default()
}

pub fn title_of(node: &Value, fallback: &str) -> String {
  node
    .get("title")
    .and_then(Value::as_str)
    .map(str::to_string)
    .unwrap_or_else(|| prettify_label(fallback))
}

pub fn prettify_label(key: &str) -> String {
  let spaced = key.replace(['_', '-'], " ");
  let mut chars = spaced.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

fn find_relocatable(root: &Map<String, Value>) -> Option<(&'static str, &Map<String, Value>)> {
  if let Some(wrapper) = root.get("$Defs").and_then(Value::as_object) {
    if wrapper.get("properties").and_then(Value::as_object).is_some() {
      return Some(("$Defs", wrapper));
    }
    if let Some(member) = sole_member_with_properties(wrapper) {
      return Some(("$Defs", member));
    }
  }
  for key in ["$defs", "definitions"] {
    if let Some(defs) = root.get(key).and_then(Value::as_object) {
      if let Some(member) = sole_member_with_properties(defs) {
        return Some(("$defs", member));
      }
    }
  }
  None
}

fn sole_member_with_properties(map: &Map<String, Value>) -> Option<&Map<String, Value>> {
  if map.len() != 1 {
    return None;
  }
  let member = map.values().next()?.as_object()?;
  member.get("properties").and_then(Value::as_object)?;
  Some(member)
}
