use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::form::FieldValue;
use crate::html::{emit_html, render_document};
use crate::recent::{self, RecentKind, DEFAULT_STATE_DIR};
use crate::session::{FormSession, OptionsLoad, SessionSettings};
use crate::validate::format_errors;

pub const LOG_ENV: &str = "FORMSMITH_LOG";
pub const CONFIG_FILE: &str = "formsmith.config.json";

#[derive(Parser)]
#[command(name = "formsmith", version, about = "Schema-driven form generator")]
pub struct Cli {
  #[command(subcommand)]
  cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
  /// Show the rendering strategy chosen for a schema.
  Analyze {
    schema: PathBuf,
    #[arg(long)]
    json: bool,
  },
  /// List options keys that name nothing in the schema.
  CheckOptions {
    schema: PathBuf,
    options: PathBuf,
  },
  Render {
    schema: PathBuf,
    #[arg(long)]
    options: Option<PathBuf>,
    #[arg(long)]
    data: Option<PathBuf>,
    #[arg(long)]
    tab: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    strict: bool,
  },
  Validate {
    schema: PathBuf,
    /// Data files or glob patterns.
    #[arg(required = true)]
    data: Vec<String>,
    #[arg(long)]
    options: Option<PathBuf>,
    #[arg(long)]
    strict: bool,
  },
  /// Load data, apply edits through the dependency engine and export.
  Fill {
    schema: PathBuf,
    #[arg(long)]
    options: Option<PathBuf>,
    #[arg(long)]
    data: Option<PathBuf>,
    #[arg(long = "select", value_name = "PATH=INDEX")]
    selects: Vec<String>,
    #[arg(long = "add-item", value_name = "PATH")]
    add_items: Vec<String>,
    #[arg(long = "set", value_name = "PATH=VALUE")]
    sets: Vec<String>,
    #[arg(long = "na", value_name = "PATH")]
    na: Vec<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    strict: bool,
    /// Export even when validation reports errors.
    #[arg(long)]
    force: bool,
  },
  /// Interactive editor. Without a schema, reopens the last one used.
  Edit {
    schema: Option<PathBuf>,
    #[arg(long)]
    options: Option<PathBuf>,
    #[arg(long)]
    data: Option<PathBuf>,
    #[arg(long)]
    out: Option<PathBuf>,
  },
  Recent,
}

#[derive(Default, serde::Deserialize)]
struct Config {
  strict_options: Option<bool>,
  recursion_limit: Option<usize>,
  collapsible_threshold: Option<usize>,
  state_dir: Option<PathBuf>,
}

impl Config {
  fn settings(&self) -> SessionSettings {
    let defaults = SessionSettings::default();
    SessionSettings {
      recursion_limit: self.recursion_limit.unwrap_or(defaults.recursion_limit),
      collapsible_threshold: self.collapsible_threshold.unwrap_or(defaults.collapsible_threshold),
    }
  }

  fn state_dir(&self) -> PathBuf {
    self.state_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
  }

  fn strict(&self, flag: bool) -> OptionsLoad {
    if flag || self.strict_options.unwrap_or(false) {
      OptionsLoad::Strict
    } else {
      OptionsLoad::ProceedAnyway
    }
  }
}

pub fn init_logging() {
  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .try_init();
}

pub fn run() -> Result<()> {
  let cli = Cli::parse();
  if !matches!(cli.cmd, Command::Edit { .. }) {
    init_logging();
  }
  let config = load_config();
  match cli.cmd {
    Command::Analyze { schema, json } => analyze(&schema, json, &config),
    Command::CheckOptions { schema, options } => check_options(&schema, &options, &config),
    Command::Render { schema, options, data, tab, out, strict } => {
      render(&schema, options.as_deref(), data.as_deref(), tab.as_deref(), out.as_deref(), strict, &config)
    }
    Command::Validate { schema, data, options, strict } => validate(&schema, &data, options.as_deref(), strict, &config),
    Command::Fill { schema, options, data, selects, add_items, sets, na, out, strict, force } => {
      let edits = Edits { selects, add_items, sets, na };
      fill(&schema, options.as_deref(), data.as_deref(), &edits, out.as_deref(), strict, force, &config)
    }
    Command::Edit { schema, options, data, out } => {
      edit(schema.as_deref(), options.as_deref(), data.as_deref(), out, &config)
    }
    Command::Recent => show_recent(&config),
  }
}

/// Opens the editor on the last used schema and options.
pub fn edit_recent() -> Result<()> {
  let config = load_config();
  edit(None, None, None, None, &config)
}

fn analyze(schema: &Path, json: bool, config: &Config) -> Result<()> {
  let session = FormSession::with_settings(read_json(schema, "schema")?, config.settings());
  if json {
    println!("{}", serde_json::to_string_pretty(&session.analysis)?);
    return Ok(());
  }
  let a = &session.analysis;
  let strategy = serde_json::to_value(a.strategy)?;
  println!("Schema: {}", schema.display());
  println!("  strategy: {}", strategy.as_str().unwrap_or_default());
  println!("  properties: {}", a.property_count);
  println!("  max depth: {}", a.max_depth);
  println!("  recursion: {}", a.has_recursion);
  println!("  definitions: {}", session.definitions.len());
  println!(
    "  complex refs: {}  inline objects: {}  primitives: {}  arrays: {}  polymorphic: {}",
    a.complex_references, a.inline_objects, a.primitives, a.arrays, a.polymorphic
  );
  if !session.tabs.is_empty() {
    println!("  tabs: {}", session.tabs.iter().map(|t| t.key.as_str()).collect::<Vec<_>>().join(", "));
  }
  Ok(())
}

fn check_options(schema: &Path, options: &Path, config: &Config) -> Result<()> {
  let session = FormSession::with_settings(read_json(schema, "schema")?, config.settings());
  let unmatched = session.check_options(&read_json(options, "options")?)?;
  if unmatched.is_empty() {
    println!("All options keys match the schema");
    return Ok(());
  }
  println!("Unmatched options keys:");
  for key in &unmatched {
    println!("  {} ({})", key.key, key.source);
  }
  bail!("{} options key(s) not found in the schema", unmatched.len());
}

#[allow(clippy::too_many_arguments)]
fn render(
  schema: &Path,
  options: Option<&Path>,
  data: Option<&Path>,
  tab: Option<&str>,
  out: Option<&Path>,
  strict: bool,
  config: &Config,
) -> Result<()> {
  let mut session = open_session(schema, options, strict, config)?;
  if let Some(data) = data {
    populate(&mut session, data)?;
  }
  if let Some(tab) = tab {
    session.activate_tab(tab)?;
  }
  let title = title_for(schema);
  match out {
    Some(out) => {
      emit_html(&session, &title, out)?;
      println!("Wrote {}", out.display());
    }
    None => print!("{}", render_document(&session, &title)),
  }
  Ok(())
}

fn validate(schema: &Path, patterns: &[String], options: Option<&Path>, strict: bool, config: &Config) -> Result<()> {
  let files = expand_patterns(patterns)?;
  if files.is_empty() {
    bail!("No data files matched {}", patterns.join(" "));
  }
  let base = open_session(schema, options, strict, config)?;
  let mut failed = 0;
  for file in &files {
    let mut session = base.clone();
    let report = populate(&mut session, file)?;
    let result = session.validate();
    if result.is_valid() && report.invalid.is_empty() {
      println!("ok {}", file.display());
      continue;
    }
    failed += 1;
    println!("FAIL {}", file.display());
    for (section, errors) in &result.by_section {
      println!("  [{}]", section);
      for line in format_errors(errors).lines() {
        println!("    {}", line);
      }
    }
    for path in &report.invalid {
      println!("  invalid-data: {} (value not among current options)", path);
    }
  }
  if failed > 0 {
    bail!("Validation failed for {} of {} file(s)", failed, files.len());
  }
  Ok(())
}

struct Edits {
  selects: Vec<String>,
  add_items: Vec<String>,
  sets: Vec<String>,
  na: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
fn fill(
  schema: &Path,
  options: Option<&Path>,
  data: Option<&Path>,
  edits: &Edits,
  out: Option<&Path>,
  strict: bool,
  force: bool,
  config: &Config,
) -> Result<()> {
  let mut session = open_session(schema, options, strict, config)?;
  if let Some(data) = data {
    populate(&mut session, data)?;
  }
  session.render_all_tabs();

  for assignment in &edits.selects {
    let (path, index) = split_assignment(assignment)?;
    let index: usize = index.parse().with_context(|| format!("Invalid variant index in --select {}", assignment))?;
    session.select_variant(path, index)?;
  }
  for path in &edits.add_items {
    session.add_array_item(path)?;
  }
  for assignment in &edits.sets {
    let (path, raw) = split_assignment(assignment)?;
    let handle = session
      .tree
      .handle(path)
      .with_context(|| format!("No field at path '{}'", path))?;
    let outcome = session.set_value(path, FieldValue::from_input(&handle.control, raw))?;
    for field in &outcome.disabled {
      eprintln!("disabled {} (rule on {})", field, path);
    }
    for field in &outcome.deferred {
      eprintln!("deferred options for {} until it is rendered", field);
    }
  }
  for path in &edits.na {
    session.set_na(path, true)?;
  }

  let result = session.validate();
  if !result.is_valid() {
    eprintln!("{}", format_errors(&result.errors));
    if !force {
      bail!("Form has {} validation error(s); use --force to export anyway", result.errors.len());
    }
  }
  let json = session.export_json()?;
  match out {
    Some(out) => {
      fs::write(out, format!("{}\n", json)).with_context(|| format!("Failed to write {}", out.display()))?;
      println!("Wrote {}", out.display());
    }
    None => println!("{}", json),
  }
  Ok(())
}

fn edit(schema: Option<&Path>, options: Option<&Path>, data: Option<&Path>, out: Option<PathBuf>, config: &Config) -> Result<()> {
  let state_dir = config.state_dir();
  let mut session = match schema {
    Some(schema) => open_session(schema, options, false, config)?,
    None => {
      let Some(last) = recent::last_schema_file(&state_dir) else {
        bail!("No schema given and none remembered in {}", state_dir.display());
      };
      let mut session = FormSession::with_settings(last.data, config.settings());
      if options.is_none() {
        if let Some(last_options) = recent::last_options_file(&state_dir) {
          session.load_options(&last_options.data, OptionsLoad::ProceedAnyway)?;
        }
      }
      if let Some(options) = options {
        load_options(&mut session, options, config.strict(false), &state_dir)?;
      }
      session
    }
  };
  if let Some(data) = data {
    populate(&mut session, data)?;
  }
  let out = out.unwrap_or_else(|| PathBuf::from("form-data.json"));
  crate::tui::run(session, out)
}

fn show_recent(config: &Config) -> Result<()> {
  let state_dir = config.state_dir();
  let recent = recent::read_recent(&state_dir);
  match &recent.schema {
    Some(file) => println!("schema:  {}", file.filename),
    None => println!("schema:  (none)"),
  }
  match &recent.options {
    Some(file) => println!("options: {}", file.filename),
    None => println!("options: (none)"),
  }
  Ok(())
}

fn open_session(schema: &Path, options: Option<&Path>, strict: bool, config: &Config) -> Result<FormSession> {
  let state_dir = config.state_dir();
  let value = read_json(schema, "schema")?;
  remember(&state_dir, RecentKind::Schema, schema, &value);
  let mut session = FormSession::with_settings(value, config.settings());
  if let Some(options) = options {
    load_options(&mut session, options, config.strict(strict), &state_dir)?;
  }
  Ok(session)
}

fn load_options(session: &mut FormSession, path: &Path, mode: OptionsLoad, state_dir: &Path) -> Result<()> {
  let value = read_json(path, "options")?;
  let unmatched = session
    .load_options(&value, mode)
    .with_context(|| format!("Failed to load options {}", path.display()))?;
  if !unmatched.is_empty() {
    eprintln!("Warning: options keys not found in the schema (loading anyway):");
    for key in &unmatched {
      eprintln!("  {} ({})", key.key, key.source);
    }
  }
  remember(state_dir, RecentKind::Options, path, &value);
  Ok(())
}

fn populate(session: &mut FormSession, path: &Path) -> Result<crate::collect::PopulateReport> {
  let text = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
  let report = session
    .load_data_str(&text)
    .with_context(|| format!("Failed to load data {}", path.display()))?;
  for unmatched in &report.unmatched {
    tracing::warn!(path = %unmatched, "data value has no matching field");
  }
  Ok(report)
}

fn remember(state_dir: &Path, kind: RecentKind, file: &Path, value: &Value) {
  if let Err(err) = recent::remember(state_dir, kind, &file.to_string_lossy(), value) {
    tracing::warn!(error = %err, "could not update recent files");
  }
}

fn read_json(path: &Path, role: &str) -> Result<Value> {
  let text = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
  serde_json::from_str(&text).with_context(|| format!("Failed to parse {} JSON {}", role, path.display()))
}

fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
  let mut files = Vec::new();
  for pattern in patterns {
    let mut matched = false;
    for entry in glob::glob(pattern).with_context(|| format!("Invalid glob pattern {}", pattern))? {
      let path = entry?;
      if path.is_file() && !files.contains(&path) {
        files.push(path);
        matched = true;
      }
    }
    if !matched {
      let path = PathBuf::from(pattern);
      if path.is_file() {
        files.push(path);
      }
    }
  }
  Ok(files)
}

fn split_assignment(assignment: &str) -> Result<(&str, &str)> {
  match assignment.split_once('=') {
    Some((path, value)) => Ok((path.trim(), value)),
    None => bail!("Expected PATH=VALUE, got '{}'", assignment),
  }
}

fn title_for(schema: &Path) -> String {
  let stem = schema.file_stem().and_then(|s| s.to_str()).unwrap_or("form");
  format!("{} - formsmith", stem)
}

fn load_config() -> Config {
  let path = Path::new(CONFIG_FILE);
  if let Ok(data) = fs::read_to_string(path) {
    if let Ok(cfg) = serde_json::from_str::<Config>(&data) {
      return cfg;
    }
  }
  Config::default()
}
