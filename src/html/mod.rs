use std::path::Path;

use anyhow::{Context, Result};

use crate::form::{ControlKind, Field, FieldValue, FormTree, NodeId, NodeKind};
use crate::session::FormSession;

const STYLE: &str = r#"
      body { font-family: sans-serif; padding: 24px; }
      fieldset { margin: 8px 0; }
      .auto-disabled { opacity: 0.6; }
      .invalid-data { outline: 2px solid #c0392b; }
      .schema-warning { color: #b9770e; font-style: italic; }
      .tabs button[aria-selected="true"] { font-weight: bold; }
      .selector-level-1 { margin-left: 16px; }
      .selector-level-2 { margin-left: 32px; }
"#;

/// A full HTML page for the session's current form.
pub fn render_document(session: &FormSession, title: &str) -> String {
  format!(
    r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8" />
    <title>{}</title>
    <style>{STYLE}    </style>
  </head>
  <body>
{}  </body>
</html>
"#,
    escape(title),
    render_form(session)
  )
}

pub fn emit_html(session: &FormSession, title: &str, out: &Path) -> Result<()> {
  if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
  }
  std::fs::write(out, render_document(session, title)).with_context(|| format!("Failed to write {}", out.display()))
}

pub fn render_form(session: &FormSession) -> String {
  let mut out = String::new();
  let strategy = serde_json::to_value(session.analysis.strategy)
    .ok()
    .and_then(|v| v.as_str().map(str::to_string))
    .unwrap_or_default();
  out.push_str(&format!("    <form class=\"formsmith\" data-strategy=\"{}\">\n", escape(&strategy)));

  if session.tabs.is_empty() {
    for root in session.tree.roots() {
      render_node(&session.tree, *root, 3, &mut out);
    }
  } else {
    out.push_str("      <nav class=\"tabs\">\n");
    for tab in &session.tabs {
      let selected = session.current_tab.as_deref() == Some(tab.key.as_str());
      out.push_str(&format!(
        "        <button type=\"button\" data-tab=\"{}\" aria-selected=\"{}\">{}</button>\n",
        escape(&tab.key),
        selected,
        escape(&tab.title)
      ));
    }
    out.push_str("      </nav>\n");
    for tab in &session.tabs {
      let selected = session.current_tab.as_deref() == Some(tab.key.as_str());
      let hidden = if selected { "" } else { " hidden" };
      match tab.node {
        Some(node) if tab.materialized => {
          out.push_str(&format!("      <section data-tab=\"{}\"{hidden}>\n", escape(&tab.key)));
          render_node(&session.tree, node, 4, &mut out);
          out.push_str("      </section>\n");
        }
        _ => {
          out.push_str(&format!("      <section data-tab=\"{}\" data-lazy=\"true\"{hidden}></section>\n", escape(&tab.key)));
        }
      }
    }
  }
  out.push_str("    </form>\n");
  out
}

fn render_node(tree: &FormTree, id: NodeId, indent: usize, out: &mut String) {
  let Some(node) = tree.node(id) else {
    return;
  };
  let pad = "  ".repeat(indent);
  let path = escape(&node.path);
  let label = escape(&node.label);
  match &node.kind {
    NodeKind::Group { collapsible } => {
      if *collapsible {
        out.push_str(&format!("{pad}<details data-path=\"{path}\"><summary>{label}</summary>\n"));
      } else {
        out.push_str(&format!("{pad}<fieldset data-path=\"{path}\"><legend>{label}</legend>\n"));
      }
      describe(node.description.as_deref(), &pad, out);
      for child in &node.children {
        render_node(tree, *child, indent + 1, out);
      }
      out.push_str(&format!("{pad}{}\n", if *collapsible { "</details>" } else { "</fieldset>" }));
    }
    NodeKind::Array(array) => {
      out.push_str(&format!("{pad}<div class=\"array\" data-path=\"{path}\" data-items=\"{}\">\n", array.items.len()));
      out.push_str(&format!("{pad}  <h4>{label}</h4>\n"));
      for child in &node.children {
        render_node(tree, *child, indent + 1, out);
      }
      out.push_str(&format!("{pad}  <button type=\"button\" data-add-item=\"{path}\">Add item</button>\n"));
      out.push_str(&format!("{pad}</div>\n"));
    }
    NodeKind::Selector(selector) => {
      out.push_str(&format!("{pad}<div class=\"polymorphic selector-level-{}\" data-path=\"{path}\">\n", selector.level));
      out.push_str(&format!("{pad}  <label>{label}</label>\n"));
      out.push_str(&format!("{pad}  <select class=\"type-selector\" data-selector=\"{path}\" data-level=\"{}\">\n", selector.level));
      out.push_str(&format!("{pad}    <option value=\"\">-- select --</option>\n"));
      for (idx, variant) in selector.variants.iter().enumerate() {
        let selected = if selector.selected == Some(idx) { " selected" } else { "" };
        out.push_str(&format!("{pad}    <option value=\"{idx}\"{selected}>{}</option>\n", escape(&variant.title)));
      }
      out.push_str(&format!("{pad}  </select>\n"));
      out.push_str(&format!("{pad}  <div class=\"variant-content\">\n"));
      for child in &node.children {
        render_node(tree, *child, indent + 2, out);
      }
      out.push_str(&format!("{pad}  </div>\n"));
      out.push_str(&format!("{pad}</div>\n"));
    }
    NodeKind::Warning { message } => {
      out.push_str(&format!("{pad}<div class=\"schema-warning\" data-path=\"{path}\">{}</div>\n", escape(message)));
    }
    NodeKind::Field(field) => render_field(&node.path, &node.label, node.description.as_deref(), field, &pad, out),
  }
}

fn describe(description: Option<&str>, pad: &str, out: &mut String) {
  if let Some(text) = description {
    out.push_str(&format!("{pad}  <p class=\"description\">{}</p>\n", escape(text)));
  }
}

fn render_field(path: &str, label: &str, description: Option<&str>, field: &Field, pad: &str, out: &mut String) {
  let id = field_id(path);
  let name = escape(path);
  let mut classes = vec!["field".to_string(), format!("control-{}", field.control.name())];
  if field.auto_disabled {
    classes.push("auto-disabled".to_string());
  }
  if field.is_invalid() {
    classes.push("invalid-data".to_string());
  }
  let mut attrs = format!(r#" id="{id}" name="{name}" data-path="{name}""#);
  if field.disabled {
    attrs.push_str(" disabled");
  }
  if field.required {
    attrs.push_str(" required");
  }
  if let Some(invalid) = &field.invalid {
    attrs.push_str(&format!(" data-invalid-values=\"{}\"", escape(&invalid.join(","))));
  }

  out.push_str(&format!("{pad}<div class=\"{}\">\n", classes.join(" ")));
  out.push_str(&format!("{pad}  <label for=\"{id}\">{}{}</label>\n", escape(label), if field.required { " *" } else { "" }));
  describe(description, pad, out);

  let text = escape(&field.value.display());
  match &field.control {
    ControlKind::Text => {
      out.push_str(&format!("{pad}  <input type=\"text\"{attrs} value=\"{text}\" />\n"));
    }
    ControlKind::TextArea { comma_list } => {
      let marker = if *comma_list { r#" data-comma-list="true""# } else { "" };
      out.push_str(&format!("{pad}  <textarea{attrs}{marker}>{text}</textarea>\n"));
    }
    ControlKind::Number { integer, minimum, maximum } => {
      let step = if *integer { "1" } else { "any" };
      let min = minimum.map(|m| format!(r#" min="{m}""#)).unwrap_or_default();
      let max = maximum.map(|m| format!(r#" max="{m}""#)).unwrap_or_default();
      out.push_str(&format!("{pad}  <input type=\"number\" step=\"{step}\"{min}{max}{attrs} value=\"{text}\" />\n"));
    }
    ControlKind::Date => {
      out.push_str(&format!("{pad}  <input type=\"date\"{attrs} value=\"{text}\" />\n"));
    }
    ControlKind::DateTime => {
      out.push_str(&format!("{pad}  <input type=\"datetime-local\"{attrs} value=\"{text}\" />\n"));
    }
    ControlKind::Checkbox => {
      let checked = if matches!(field.value, FieldValue::Flag(true)) { " checked" } else { "" };
      out.push_str(&format!("{pad}  <input type=\"checkbox\"{attrs}{checked} />\n"));
    }
    ControlKind::Slider { min, max, step } => {
      out.push_str(&format!("{pad}  <input type=\"range\" min=\"{min}\" max=\"{max}\" step=\"{step}\"{attrs} value=\"{text}\" />\n"));
    }
    ControlKind::Dropdown | ControlKind::MultiSelect => {
      let multiple = if field.control.is_multi() { " multiple" } else { "" };
      let selections = field.value.selections();
      out.push_str(&format!("{pad}  <select{attrs}{multiple}>\n"));
      if !field.control.is_multi() {
        out.push_str(&format!("{pad}    <option value=\"\">-- select --</option>\n"));
      }
      for option in &field.options {
        let selected = if selections.contains(&option.value) { " selected" } else { "" };
        out.push_str(&format!(
          "{pad}    <option value=\"{}\"{selected}>{}</option>\n",
          escape(&option.value),
          escape(&option.label)
        ));
      }
      out.push_str(&format!("{pad}  </select>\n"));
    }
    ControlKind::CheckboxGroup | ControlKind::RadioGroup => {
      let kind = if field.control.is_multi() { "checkbox" } else { "radio" };
      let selections = field.value.selections();
      let disabled = if field.disabled { " disabled" } else { "" };
      out.push_str(&format!("{pad}  <div class=\"choice-group\" data-path=\"{name}\">\n"));
      for (idx, option) in field.options.iter().enumerate() {
        let checked = if selections.contains(&option.value) { " checked" } else { "" };
        let exclusive = if field.exclusive.contains(&option.value) { r#" data-exclusive="true""# } else { "" };
        out.push_str(&format!(
          "{pad}    <label><input type=\"{kind}\" id=\"{id}-{idx}\" name=\"{name}\" value=\"{}\"{checked}{exclusive}{disabled} /> {}</label>\n",
          escape(&option.value),
          escape(&option.label)
        ));
      }
      out.push_str(&format!("{pad}  </div>\n"));
    }
  }

  if let Some(na) = &field.na {
    let checked = if field.na_checked { " checked" } else { "" };
    out.push_str(&format!(
      "{pad}  <label class=\"na-toggle\"><input type=\"checkbox\" data-na-for=\"{name}\" value=\"{}\"{checked} /> {}</label>\n",
      escape(&na.value),
      escape(&na.label)
    ));
  }
  out.push_str(&format!("{pad}</div>\n"));
}

fn field_id(path: &str) -> String {
  let mut slug = String::with_capacity(path.len());
  for c in path.chars() {
    match c {
      c if c.is_ascii_alphanumeric() => slug.push(c),
      '.' => slug.push('_'),
      '_' => slug.push_str("__"),
      '-' => slug.push_str("--"),
      other => slug.push_str(&format!("-{:x}-", other as u32)),
    }
  }
  format!("field-{slug}")
}

pub fn escape(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  for c in input.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      other => out.push(other),
    }
  }
  out
}
