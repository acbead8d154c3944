use std::collections::HashSet;

use serde_json::{Map, Value};

const MAX_REF_HOPS: usize = 32;

/// What an array item `$ref: "#"` expands to when the item is created.
#[derive(Debug, Clone, PartialEq)]
pub enum RecursiveItems {
  Variants(Vec<Value>),
  Properties(Map<String, Value>),
}

pub fn is_root_ref(reference: &str) -> bool {
  matches!(reference.trim(), "#" | "#/")
}

pub fn ref_of(node: &Value) -> Option<&str> {
  node.get("$ref").and_then(Value::as_str)
}

pub fn ref_name(reference: &str) -> &str {
  if is_root_ref(reference) {
    return "root";
  }
  reference.rsplit('/').next().unwrap_or(reference)
}

/// Walks a `#/...` pointer through `root`. `definitions`, `$defs` and the
/// legacy `$Defs` key stand in for each other when the named one is absent.
pub fn resolve_ref<'a>(reference: &str, root: &'a Value) -> Option<&'a Value> {
  let reference = reference.trim();
  if is_root_ref(reference) {
    return Some(root);
  }
  let Some(pointer) = reference.strip_prefix("#/") else {
    tracing::warn!(reference, "unsupported $ref (only local pointers resolve)");
    return None;
  };

  let mut current = root;
  for raw in pointer.split('/') {
    let segment = unescape_segment(raw);
    let next = match current {
      Value::Object(map) => lookup_aliased(map, &segment),
      Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
      _ => None,
    };
    let Some(next) = next else {
      tracing::debug!(reference, segment = %segment, "unresolvable $ref segment");
      return None;
    };
    current = next;
  }
  Some(current)
}

/// Follows a chain of `$ref`s starting at `node`. Keywords written next to a
/// `$ref` (title, description, ...) override the referenced schema's.
pub fn resolve_schema(node: &Value, root: &Value) -> Option<Value> {
  let mut current = node.clone();
  let mut seen = HashSet::new();
  for _ in 0..MAX_REF_HOPS {
    let Some(reference) = ref_of(&current).map(str::to_string) else {
      return Some(current);
    };
    if !seen.insert(reference.clone()) {
      tracing::warn!(reference = %reference, "cyclic $ref chain");
      return None;
    }
    let target = resolve_ref(&reference, root)?;
    current = overlay(&current, target);
  }
  tracing::warn!("$ref chain exceeded {MAX_REF_HOPS} hops");
  None
}

/// Like [`resolve_schema`], but hands back the original node when the
/// reference is broken so callers can still render something.
pub fn resolve_or_self(node: &Value, root: &Value) -> Value {
  resolve_schema(node, root).unwrap_or_else(|| node.clone())
}

pub fn recursive_item_schema(root: &Value) -> Option<RecursiveItems> {
  for key in ["oneOf", "anyOf"] {
    if let Some(variants) = root.get(key).and_then(Value::as_array) {
      if !variants.is_empty() {
        return Some(RecursiveItems::Variants(variants.clone()));
      }
    }
  }
  root
    .get("properties")
    .and_then(Value::as_object)
    .map(|props| RecursiveItems::Properties(props.clone()))
}

/// All named definitions reachable from the root, `$defs` winning over the
/// older spellings on name clashes.
pub fn definitions(root: &Value) -> Map<String, Value> {
  let mut merged = Map::new();
  for key in ["$Defs", "definitions", "$defs"] {
    if let Some(defs) = root.get(key).and_then(Value::as_object) {
      for (name, schema) in defs {
        merged.insert(name.clone(), schema.clone());
      }
    }
  }
  merged
}

fn lookup_aliased<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
  if let Some(value) = map.get(key) {
    return Some(value);
  }
  let aliases: &[&str] = match key {
    "$defs" => &["definitions", "$Defs"],
    "definitions" => &["$defs", "$Defs"],
    "$Defs" => &["$defs", "definitions"],
    _ => &[],
  };
  aliases.iter().find_map(|alias| map.get(*alias))
}

fn overlay(referrer: &Value, target: &Value) -> Value {
  let mut resolved = target.clone();
  if let (Value::Object(out), Value::Object(siblings)) = (&mut resolved, referrer) {
    for (key, value) in siblings {
      if key != "$ref" {
        out.insert(key.clone(), value.clone());
      }
    }
  }
  resolved
}

fn unescape_segment(raw: &str) -> String {
  raw.replace("~1", "/").replace("~0", "~")
}
