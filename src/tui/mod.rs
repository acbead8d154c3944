use std::cmp::min;
use std::collections::BTreeMap;
use std::fs;
use std::io::stdout;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Padding, Paragraph, Tabs, Wrap};
use ratatui::Terminal;

use crate::deps::ChangeOutcome;
use crate::form::{ControlKind, FieldValue, FormTree, NodeId, NodeKind};
use crate::session::FormSession;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
  Browse,
  Edit,
}

enum Modal {
  Options { path: String, list: ListState },
  Variants { id: NodeId, list: ListState },
  ConfirmSave { errors: usize },
}

struct Row {
  id: NodeId,
  depth: usize,
}

struct Theme {
  panel_bg: Color,
  fg: Color,
  dim: Color,
  accent: Color,
  accent2: Color,
  highlight_bg: Color,
}

impl Theme {
  fn dark() -> Self {
    Self {
      panel_bg: Color::Rgb(18, 20, 22),
      fg: Color::Rgb(255, 255, 255),
      dim: Color::Rgb(150, 160, 170),
      accent: Color::Rgb(0, 255, 255),
      accent2: Color::Rgb(234, 81, 114),
      highlight_bg: Color::Rgb(28, 30, 34),
    }
  }
}

struct AppState {
  session: FormSession,
  out: PathBuf,
  rows: Vec<Row>,
  row_state: ListState,
  tab: usize,
  mode: Mode,
  input: String,
  modal: Option<Modal>,
  errors: BTreeMap<String, Vec<String>>,
  log: Vec<String>,
  status: String,
  dirty: bool,
  theme: Theme,
  info_modal: Option<String>,
}

pub fn run(session: FormSession, out: PathBuf) -> Result<()> {
  enable_raw_mode()?;
  let mut stdout = stdout();
  execute!(stdout, EnterAlternateScreen)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let mut state = AppState::new(session, out);

  let res = loop {
    terminal.draw(|f| ui(f, &mut state))?;

    if event::poll(Duration::from_millis(200))? {
      if let Event::Key(key) = event::read()? {
        match handle_key(&mut state, key) {
          Ok(true) => break Ok(()),
          Ok(false) => {}
          Err(err) => break Err(err),
        }
      }
    }
  };

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
  terminal.show_cursor()?;

  res
}

impl AppState {
  fn new(session: FormSession, out: PathBuf) -> Self {
    let tab = session
      .current_tab
      .as_deref()
      .and_then(|key| session.tabs.iter().position(|t| t.key == key))
      .unwrap_or(0);
    let mut state = Self {
      session,
      out,
      rows: Vec::new(),
      row_state: ListState::default(),
      tab,
      mode: Mode::Browse,
      input: String::new(),
      modal: None,
      errors: BTreeMap::new(),
      log: vec!["formsmith editor ready".to_string()],
      status: "Ready".to_string(),
      dirty: false,
      theme: Theme::dark(),
      info_modal: None,
    };
    state.row_state.select(Some(0));
    state.refresh_rows();
    state
  }

  fn refresh_rows(&mut self) {
    let tree = &self.session.tree;
    let mut rows = Vec::new();
    let tab_root = self.session.tabs.get(self.tab).and_then(|t| t.node);
    match tab_root {
      Some(root) => push_rows(tree, root, 0, &mut rows),
      None if self.session.tabs.is_empty() => {
        for root in tree.roots() {
          push_rows(tree, *root, 0, &mut rows);
        }
      }
      None => {}
    }
    self.rows = rows;
    let idx = self.row_state.selected().unwrap_or(0);
    self.row_state.select(Some(min(idx, self.rows.len().saturating_sub(1))));
  }

  fn selected(&self) -> Option<NodeId> {
    self.row_state.selected().and_then(|i| self.rows.get(i)).map(|r| r.id)
  }

  fn selected_path(&self) -> Option<String> {
    self.selected().and_then(|id| self.session.tree.node(id)).map(|n| n.path.clone())
  }

  fn push_log(&mut self, line: impl Into<String>) {
    self.log.push(line.into());
  }

  fn log_outcome(&mut self, outcome: &ChangeOutcome) {
    self.dirty = true;
    if !outcome.recomputed.is_empty() {
      self.push_log(format!("options refreshed: {}", outcome.recomputed.join(", ")));
    }
    if !outcome.deferred.is_empty() {
      self.push_log(format!("deferred until shown: {}", outcome.deferred.join(", ")));
    }
    if !outcome.restored.is_empty() {
      self.push_log(format!("restored invalid data ok: {}", outcome.restored.join(", ")));
    }
    if !outcome.disabled.is_empty() {
      self.push_log(format!("disabled by rule: {}", outcome.disabled.join(", ")));
    }
    if !outcome.enabled.is_empty() {
      self.push_log(format!("re-enabled: {}", outcome.enabled.join(", ")));
    }
  }

  fn fail(&mut self, err: impl std::fmt::Display) {
    self.status = "Error".to_string();
    self.push_log(format!("error: {}", err));
  }

  fn switch_tab(&mut self, delta: i32) {
    let len = self.session.tabs.len();
    if len == 0 {
      return;
    }
    let next = (self.tab as i32 + delta).rem_euclid(len as i32) as usize;
    let key = self.session.tabs[next].key.clone();
    match self.session.activate_tab(&key) {
      Ok(receipt) => {
        self.tab = next;
        if !receipt.fields.is_empty() {
          self.push_log(format!("tab {} rendered ({} fields)", key, receipt.fields.len()));
        }
        if !receipt.initialized.is_empty() {
          self.push_log(format!("initialized dependents: {}", receipt.initialized.join(", ")));
        }
        self.row_state.select(Some(0));
        self.refresh_rows();
      }
      Err(err) => self.fail(err),
    }
  }

  fn activate(&mut self) {
    let Some(id) = self.selected() else { return; };
    let Some(node) = self.session.tree.node(id) else { return; };
    let path = node.path.clone();
    match &node.kind {
      NodeKind::Field(field) if field.disabled => {
        self.info_modal = Some(format!("{} is disabled.", path));
      }
      NodeKind::Field(field) if field.control.is_choice() => {
        let mut list = ListState::default();
        list.select(Some(0));
        self.modal = Some(Modal::Options { path, list });
      }
      NodeKind::Field(field) if field.control == ControlKind::Checkbox => {
        let next = !matches!(field.value, FieldValue::Flag(true));
        self.apply_value(&path, FieldValue::Flag(next));
      }
      NodeKind::Field(field) => {
        self.input = field.value.display();
        self.mode = Mode::Edit;
      }
      NodeKind::Selector(selector) => {
        let mut list = ListState::default();
        list.select(Some(selector.selected.unwrap_or(0)));
        self.modal = Some(Modal::Variants { id, list });
      }
      NodeKind::Array(_) => self.add_item(),
      NodeKind::Group { .. } | NodeKind::Warning { .. } => {}
    }
  }

  fn apply_value(&mut self, path: &str, value: FieldValue) {
    match self.session.set_value(path, value) {
      Ok(outcome) => {
        self.push_log(format!("set {}", path));
        self.log_outcome(&outcome);
        self.refresh_rows();
      }
      Err(err) => self.fail(err),
    }
  }

  fn commit_input(&mut self) {
    self.mode = Mode::Browse;
    let Some(path) = self.selected_path() else { return; };
    let Some(handle) = self.session.tree.handle(&path) else { return; };
    let value = FieldValue::from_input(&handle.control, &self.input);
    self.input.clear();
    self.apply_value(&path, value);
  }

  fn toggle_na(&mut self) {
    let Some(path) = self.selected_path() else { return; };
    let Some(field) = self.session.tree.field(&path) else { return; };
    if field.na.is_none() {
      self.info_modal = Some(format!("{} has no N/A option.", path));
      return;
    }
    let checked = !field.na_checked;
    match self.session.set_na(&path, checked) {
      Ok(outcome) => {
        self.push_log(format!("{} N/A {}", path, if checked { "on" } else { "off" }));
        self.log_outcome(&outcome);
        self.refresh_rows();
      }
      Err(err) => self.fail(err),
    }
  }

  fn add_item(&mut self) {
    let Some(id) = self.selected() else { return; };
    let Some(path) = array_at_or_above(&self.session.tree, id) else {
      self.info_modal = Some("Select an array first.".to_string());
      return;
    };
    match self.session.add_array_item(&path) {
      Ok(receipt) => {
        self.dirty = true;
        self.push_log(format!("added {}", receipt.scope));
        self.refresh_rows();
      }
      Err(err) => self.fail(err),
    }
  }

  fn remove_item(&mut self) {
    let Some(id) = self.selected() else { return; };
    let Some((path, index)) = array_item_of(&self.session.tree, id) else {
      self.info_modal = Some("Select an array item to remove.".to_string());
      return;
    };
    match self.session.remove_array_item(&path, index) {
      Ok(()) => {
        self.dirty = true;
        self.push_log(format!("removed {}.{}", path, index));
        self.refresh_rows();
      }
      Err(err) => self.fail(err),
    }
  }

  fn run_validation(&mut self) -> usize {
    let result = self.session.validate();
    self.errors.clear();
    for error in &result.errors {
      self.errors.entry(error.path.clone()).or_default().push(format!("{} {}", error.code, error.message));
    }
    self.refresh_rows();
    for (section, errors) in &result.by_section {
      self.log.push(format!("[{}] {} error(s)", section, errors.len()));
    }
    if result.is_valid() {
      self.push_log("validation ok");
    }
    result.errors.len()
  }

  fn save(&mut self) {
    let errors = self.run_validation();
    if errors > 0 {
      self.modal = Some(Modal::ConfirmSave { errors });
      return;
    }
    self.write_out();
  }

  fn write_out(&mut self) {
    let json = match self.session.export_json() {
      Ok(json) => json,
      Err(err) => return self.fail(err),
    };
    match fs::write(&self.out, format!("{}\n", json)) {
      Ok(()) => {
        self.dirty = false;
        self.status = "Saved".to_string();
        self.push_log(format!("saved {} ok", self.out.display()));
      }
      Err(err) => self.fail(format!("failed to write {}: {}", self.out.display(), err)),
    }
    self.refresh_rows();
  }
}

fn push_rows(tree: &FormTree, id: NodeId, depth: usize, rows: &mut Vec<Row>) {
  rows.push(Row { id, depth });
  for child in tree.children(id) {
    push_rows(tree, *child, depth + 1, rows);
  }
}

fn array_at_or_above(tree: &FormTree, id: NodeId) -> Option<String> {
  let mut current = Some(id);
  while let Some(node) = current.and_then(|c| tree.node(c)) {
    if matches!(node.kind, NodeKind::Array(_)) {
      return Some(node.path.clone());
    }
    current = node.parent;
  }
  None
}

fn array_item_of(tree: &FormTree, id: NodeId) -> Option<(String, usize)> {
  let mut current = id;
  loop {
    let parent = tree.node(current)?.parent?;
    let parent_node = tree.node(parent)?;
    if let NodeKind::Array(array) = &parent_node.kind {
      let index = array.items.iter().position(|i| *i == current)?;
      return Some((parent_node.path.clone(), index));
    }
    current = parent;
  }
}

fn handle_key(state: &mut AppState, key: KeyEvent) -> Result<bool> {
  if state.info_modal.is_some() {
    if matches!(key.code, KeyCode::Esc | KeyCode::Enter) {
      state.info_modal = None;
    }
    return Ok(false);
  }
  if let Some(modal) = state.modal.take() {
    handle_modal_key(state, modal, key);
    return Ok(false);
  }
  if state.mode == Mode::Edit {
    match key.code {
      KeyCode::Esc => {
        state.mode = Mode::Browse;
        state.input.clear();
      }
      KeyCode::Enter => state.commit_input(),
      KeyCode::Backspace => {
        state.input.pop();
      }
      KeyCode::Char(c) => state.input.push(c),
      _ => {}
    }
    return Ok(false);
  }
  match key.code {
    KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(true),
    KeyCode::Up => move_selection(&mut state.row_state, state.rows.len(), -1),
    KeyCode::Down => move_selection(&mut state.row_state, state.rows.len(), 1),
    KeyCode::PageUp => move_selection(&mut state.row_state, state.rows.len(), -10),
    KeyCode::PageDown => move_selection(&mut state.row_state, state.rows.len(), 10),
    KeyCode::Tab | KeyCode::Right => state.switch_tab(1),
    KeyCode::BackTab | KeyCode::Left => state.switch_tab(-1),
    KeyCode::Enter => state.activate(),
    KeyCode::Char('n') => state.toggle_na(),
    KeyCode::Char('a') => state.add_item(),
    KeyCode::Char('d') => state.remove_item(),
    KeyCode::Char('v') => {
      state.run_validation();
    }
    KeyCode::Char('s') => state.save(),
    _ => {}
  }
  Ok(false)
}

fn handle_modal_key(state: &mut AppState, modal: Modal, key: KeyEvent) {
  match modal {
    Modal::ConfirmSave { errors } => match key.code {
      KeyCode::Char('y') | KeyCode::Enter => {
        // The form may have changed while the dialog was open.
        let remaining = state.run_validation();
        if remaining > 0 {
          state.push_log(format!("saving with {} validation error(s)", remaining));
        }
        state.write_out();
      }
      KeyCode::Char('n') | KeyCode::Esc => {
        state.push_log(format!("save cancelled ({} error(s))", errors));
      }
      _ => state.modal = Some(Modal::ConfirmSave { errors }),
    },
    Modal::Options { path, mut list } => {
      let options: Vec<String> = state
        .session
        .tree
        .field(&path)
        .map(|f| f.options.iter().map(|o| o.value.clone()).collect())
        .unwrap_or_default();
      let multi = state.session.tree.field(&path).is_some_and(|f| f.control.is_multi());
      match key.code {
        KeyCode::Esc => return,
        KeyCode::Up => move_selection(&mut list, options.len(), -1),
        KeyCode::Down => move_selection(&mut list, options.len(), 1),
        KeyCode::Enter | KeyCode::Char(' ') => {
          if let Some(value) = list.selected().and_then(|i| options.get(i)) {
            match state.session.toggle_option(&path, value) {
              Ok(outcome) => {
                state.push_log(format!("{} = {}", path, value));
                state.log_outcome(&outcome);
                state.refresh_rows();
              }
              Err(err) => state.fail(err),
            }
          }
          if !multi {
            return;
          }
        }
        _ => {}
      }
      state.modal = Some(Modal::Options { path, list });
    }
    Modal::Variants { id, mut list } => {
      let count = state.session.tree.selector_at(id).map(|s| s.variants.len()).unwrap_or(0);
      match key.code {
        KeyCode::Esc => return,
        KeyCode::Up => move_selection(&mut list, count, -1),
        KeyCode::Down => move_selection(&mut list, count, 1),
        KeyCode::Enter => {
          let index = list.selected().unwrap_or(0);
          match state.session.select_variant_at(id, index) {
            Ok(receipt) => {
              state.dirty = true;
              state.push_log(format!("variant {} selected ({} fields)", index + 1, receipt.fields.len()));
              state.refresh_rows();
            }
            Err(err) => state.fail(err),
          }
          return;
        }
        _ => {}
      }
      state.modal = Some(Modal::Variants { id, list });
    }
  }
}

fn move_selection(state: &mut ListState, len: usize, delta: i32) {
  let len = len.saturating_sub(1);
  let idx = state.selected().unwrap_or(0) as i32;
  let next = (idx + delta).clamp(0, len as i32) as usize;
  state.select(Some(next));
}

fn panel(title: &str, theme: &Theme) -> Block<'static> {
  Block::default()
    .borders(Borders::ALL)
    .title(Span::styled(format!("[{}]", title), Style::default().fg(theme.fg)))
    .padding(Padding::horizontal(1))
    .style(Style::default().bg(theme.panel_bg))
}

fn ui(f: &mut ratatui::Frame, state: &mut AppState) {
  let size = f.size();
  let has_tabs = !state.session.tabs.is_empty();
  let layout = Layout::default()
    .direction(Direction::Vertical)
    .constraints(
      [
        Constraint::Length(3),
        Constraint::Length(if has_tabs { 3 } else { 0 }),
        Constraint::Min(15),
        Constraint::Min(8),
        Constraint::Length(3),
      ]
      .as_ref(),
    )
    .split(size);

  let header = Paragraph::new(vec![header_line(state, layout[0].width)]).block(
    Block::default()
      .borders(Borders::ALL)
      .padding(Padding { left: 1, right: 1, top: 0, bottom: 0 })
      .style(Style::default().bg(state.theme.panel_bg)),
  );
  f.render_widget(header, layout[0]);

  if has_tabs {
    let titles: Vec<Line> = state
      .session
      .tabs
      .iter()
      .map(|t| {
        let style = if t.materialized { Style::default().fg(state.theme.fg) } else { Style::default().fg(state.theme.dim) };
        Line::from(Span::styled(t.title.clone(), style))
      })
      .collect();
    let tabs = Tabs::new(titles)
      .select(state.tab)
      .block(panel("Tabs", &state.theme))
      .highlight_style(Style::default().fg(state.theme.accent2).add_modifier(Modifier::BOLD));
    f.render_widget(tabs, layout[1]);
  }

  let body = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(55), Constraint::Percentage(45)].as_ref())
    .split(layout[2]);

  let fields = list_rows(state);
  let mut row_state = state.row_state.clone();
  f.render_stateful_widget(fields, body[0], &mut row_state);
  state.row_state = row_state;

  let details = Paragraph::new(render_details(state))
    .block(panel("Details", &state.theme))
    .wrap(Wrap { trim: true });
  f.render_widget(details, body[1]);

  let log = Paragraph::new(render_log_lines(state))
    .block(panel("Log", &state.theme))
    .wrap(Wrap { trim: true });
  f.render_widget(log, layout[3]);

  let footer = Paragraph::new(vec![footer_line(state)]).block(
    Block::default()
      .borders(Borders::ALL)
      .padding(Padding::horizontal(1))
      .style(Style::default().bg(state.theme.panel_bg)),
  );
  f.render_widget(footer, layout[4]);

  let confirm = match &state.modal {
    Some(Modal::ConfirmSave { errors }) => Some(*errors),
    _ => None,
  };
  if let Some(errors) = confirm {
    let msg = format!("Form has {} validation error(s). Save anyway? (y/n)", errors);
    render_info_modal(f, state, &msg);
  } else if state.modal.is_some() {
    render_modal(f, state);
  }
  if let Some(msg) = state.info_modal.clone() {
    render_info_modal(f, state, &msg);
  }
}

fn footer_line(state: &AppState) -> Line<'static> {
  let key = |k: &'static str| Span::styled(k, Style::default().fg(state.theme.accent2).add_modifier(Modifier::BOLD));
  if state.mode == Mode::Edit {
    return Line::from(vec![
      Span::styled("> ", Style::default().fg(state.theme.accent)),
      Span::styled(state.input.clone(), Style::default().fg(state.theme.fg)),
      Span::styled("_", Style::default().fg(state.theme.dim)),
      Span::raw("   "),
      key("Enter"),
      Span::raw(" apply  "),
      key("Esc"),
      Span::raw(" cancel"),
    ]);
  }
  Line::from(vec![
    key("↑↓"),
    Span::raw(" move  "),
    key("Tab"),
    Span::raw(" section  "),
    key("Enter"),
    Span::raw(" edit  "),
    key("N"),
    Span::raw(" n/a  "),
    key("A"),
    Span::raw(" add  "),
    key("D"),
    Span::raw(" remove  "),
    key("V"),
    Span::raw(" validate  "),
    key("S"),
    Span::raw(" save  "),
    key("Esc"),
    Span::raw(" exit"),
  ])
}

fn list_rows(state: &AppState) -> List<'_> {
  let tree = &state.session.tree;
  let items: Vec<ListItem> = state
    .rows
    .iter()
    .filter_map(|row| {
      let node = tree.node(row.id)?;
      let indent = "  ".repeat(row.depth);
      let has_errors = state.errors.contains_key(&node.path);
      let line = match &node.kind {
        NodeKind::Group { .. } => Line::from(vec![
          Span::raw(indent),
          Span::styled(node.label.clone(), Style::default().fg(state.theme.accent).add_modifier(Modifier::BOLD)),
        ]),
        NodeKind::Array(array) => Line::from(vec![
          Span::raw(indent),
          Span::styled("[A] ", Style::default().fg(state.theme.accent2)),
          Span::styled(node.label.clone(), Style::default().fg(state.theme.accent)),
          Span::styled(format!(" ({})", array.items.len()), Style::default().fg(state.theme.dim)),
        ]),
        NodeKind::Selector(selector) => {
          let chosen = selector
            .selected
            .and_then(|i| selector.variants.get(i))
            .map(|v| v.title.clone())
            .unwrap_or_else(|| "-- select --".to_string());
          Line::from(vec![
            Span::raw(indent),
            Span::styled("[?] ", Style::default().fg(state.theme.accent2)),
            Span::styled(format!("{}: ", node.label), Style::default().fg(state.theme.fg)),
            Span::styled(chosen, Style::default().fg(state.theme.accent)),
          ])
        }
        NodeKind::Warning { message } => Line::from(vec![
          Span::raw(indent),
          Span::styled(format!("[!] {}", message), Style::default().fg(state.theme.dim)),
        ]),
        NodeKind::Field(field) => {
          let value = if field.na_checked {
            field.na.as_ref().map(|na| na.label.clone()).unwrap_or_default()
          } else {
            field.value.display()
          };
          let label_style = if field.disabled {
            Style::default().fg(state.theme.dim)
          } else if has_errors || field.is_invalid() {
            Style::default().fg(state.theme.accent2)
          } else {
            Style::default().fg(state.theme.fg)
          };
          let marker = if field.required { "*" } else { "" };
          Line::from(vec![
            Span::raw(indent),
            Span::styled(format!("{}{}: ", node.label, marker), label_style),
            Span::styled(value, Style::default().fg(if field.disabled { state.theme.dim } else { state.theme.accent })),
          ])
        }
      };
      Some(ListItem::new(line))
    })
    .collect();

  let title = state
    .session
    .tabs
    .get(state.tab)
    .map(|t| t.title.clone())
    .unwrap_or_else(|| "Form".to_string());
  List::new(items)
    .block(panel(&title, &state.theme))
    .highlight_style(Style::default().bg(state.theme.highlight_bg).fg(state.theme.fg).add_modifier(Modifier::BOLD))
}

fn render_details(state: &AppState) -> Vec<Line<'_>> {
  let theme = &state.theme;
  let dim = Style::default().fg(theme.dim);
  let fg = Style::default().fg(theme.fg);
  let mut lines = Vec::new();
  let Some(node) = state.selected().and_then(|id| state.session.tree.node(id)) else {
    lines.push(Line::from(Span::styled("Nothing to show in this section", dim)));
    return lines;
  };
  lines.push(Line::from(Span::styled(node.label.clone(), fg.add_modifier(Modifier::BOLD))));
  if !node.path.is_empty() {
    lines.push(Line::from(vec![Span::styled("path ", dim), Span::styled(node.path.clone(), fg)]));
  }
  if let Some(description) = &node.description {
    lines.push(Line::from(Span::styled(description.clone(), dim)));
  }
  match &node.kind {
    NodeKind::Field(field) => {
      lines.push(Line::from(vec![
        Span::styled("control ", dim),
        Span::styled(field.control.name(), fg),
        Span::raw("  "),
        Span::styled("required ", dim),
        Span::styled(if field.required { "yes" } else { "no" }, fg),
      ]));
      if field.disabled {
        let why = if field.auto_disabled { "disabled by rule" } else { "disabled" };
        lines.push(Line::from(Span::styled(why, Style::default().fg(theme.accent2))));
      }
      if !field.options.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled("Options:", dim)));
        let selections = field.value.selections();
        for option in &field.options {
          let mark = if selections.contains(&option.value) { "[X]" } else { "[ ]" };
          let exclusive = if field.exclusive.contains(&option.value) { " (exclusive)" } else { "" };
          lines.push(Line::from(Span::styled(format!("  {} {}{}", mark, option.label, exclusive), fg)));
        }
      }
      if let Some(na) = &field.na {
        let mark = if field.na_checked { "[X]" } else { "[ ]" };
        lines.push(Line::from(Span::styled(format!("  {} {}", mark, na.label), fg)));
      }
      if let Some(invalid) = &field.invalid {
        lines.push(Line::from(Span::styled(
          format!("invalid data: {}", invalid.join(", ")),
          Style::default().fg(theme.accent2),
        )));
      }
    }
    NodeKind::Selector(selector) => {
      lines.push(Line::from(Span::styled("Variants:", dim)));
      for (idx, variant) in selector.variants.iter().enumerate() {
        let mark = if selector.selected == Some(idx) { "(*)" } else { "( )" };
        lines.push(Line::from(Span::styled(format!("  {} {}", mark, variant.title), fg)));
      }
    }
    NodeKind::Array(array) => {
      lines.push(Line::from(vec![Span::styled("items ", dim), Span::styled(array.items.len().to_string(), fg)]));
    }
    NodeKind::Group { collapsible } => {
      if *collapsible {
        lines.push(Line::from(Span::styled("collapsible", dim)));
      }
    }
    NodeKind::Warning { message } => {
      lines.push(Line::from(Span::styled(message.clone(), Style::default().fg(theme.accent2))));
    }
  }
  if let Some(errors) = state.errors.get(&node.path) {
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("Errors:", dim)));
    for error in errors {
      lines.push(Line::from(Span::styled(format!("  {}", error), Style::default().fg(theme.accent2))));
    }
  }
  lines
}

fn render_log_lines(state: &AppState) -> Vec<Line<'_>> {
  state
    .log
    .iter()
    .rev()
    .take(12)
    .rev()
    .map(|l| {
      let lower = l.to_lowercase();
      let style = if lower.contains("error") || lower.contains("failed") {
        Style::default().fg(state.theme.accent2)
      } else if lower.contains(" ok") {
        Style::default().fg(state.theme.accent)
      } else {
        Style::default().fg(state.theme.fg)
      };
      Line::from(Span::styled(l.clone(), style))
    })
    .collect()
}

fn header_line(state: &AppState, width: u16) -> Line<'static> {
  let left_plain = format!("FORMSMITH Editor {}", env!("CARGO_PKG_VERSION"));
  let marker = if state.dirty { " *" } else { "" };
  let right_plain = format!("{} -> {}{}", state.status, state.out.display(), marker);
  let content_width = width.saturating_sub(4) as usize;
  let include_right = content_width >= left_plain.len() + 1 + right_plain.len();
  let mut spans = vec![
    Span::styled("FORMSMITH ", Style::default().fg(state.theme.accent2).add_modifier(Modifier::BOLD)),
    Span::styled("Editor ", Style::default().fg(state.theme.accent).add_modifier(Modifier::BOLD)),
    Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(state.theme.accent)),
  ];
  if include_right {
    spans.push(Span::raw(" ".repeat(content_width.saturating_sub(left_plain.len() + right_plain.len()))));
    spans.push(Span::styled(right_plain, Style::default().fg(state.theme.dim)));
  }
  Line::from(spans)
}

fn render_modal(f: &mut ratatui::Frame, state: &mut AppState) {
  let area = centered_rect(40, 40, f.size());
  f.render_widget(Clear, area);
  f.render_widget(Block::default().style(Style::default().bg(state.theme.panel_bg)), area);
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([Constraint::Length(3), Constraint::Min(4)].as_ref())
    .split(area);

  let tree = &state.session.tree;
  let (title, items, list) = match &mut state.modal {
    Some(Modal::Options { path, list }) => {
      let items: Vec<ListItem> = match tree.field(path) {
        Some(field) => {
          let selections = field.value.selections();
          field
            .options
            .iter()
            .map(|o| {
              let mark = if selections.contains(&o.value) { "[X]" } else { "[ ]" };
              ListItem::new(Line::from(Span::raw(format!("{} {}", mark, o.label))))
            })
            .collect()
        }
        None => Vec::new(),
      };
      (format!("Choose {}", path), items, list)
    }
    Some(Modal::Variants { id, list }) => {
      let items: Vec<ListItem> = tree
        .selector_at(*id)
        .map(|s| s.variants.iter().map(|v| ListItem::new(Line::from(Span::raw(v.title.clone())))).collect())
        .unwrap_or_default();
      ("Select Variant".to_string(), items, list)
    }
    _ => return,
  };

  let heading = Paragraph::new(Line::from(vec![Span::styled(
    title,
    Style::default().fg(state.theme.accent).add_modifier(Modifier::BOLD),
  )]))
  .block(
    Block::default()
      .borders(Borders::ALL)
      .padding(Padding::horizontal(1))
      .style(Style::default().bg(state.theme.panel_bg)),
  );
  f.render_widget(heading, chunks[0]);

  let options = List::new(items)
    .block(panel("Options", &state.theme))
    .highlight_style(Style::default().bg(state.theme.highlight_bg).fg(state.theme.fg).add_modifier(Modifier::BOLD));
  f.render_stateful_widget(options, chunks[1], list);
}

fn render_info_modal(f: &mut ratatui::Frame, state: &AppState, msg: &str) {
  let area = centered_rect(36, 18, f.size());
  f.render_widget(Clear, area);
  let block = Block::default()
    .borders(Borders::ALL)
    .padding(Padding::horizontal(1))
    .style(Style::default().bg(state.theme.panel_bg));
  let text = Paragraph::new(Line::from(vec![Span::styled(msg.to_string(), Style::default().fg(state.theme.accent))]))
    .block(block)
    .wrap(Wrap { trim: true });
  f.render_widget(text, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: ratatui::layout::Rect) -> ratatui::layout::Rect {
  let popup_layout = Layout::default()
    .direction(Direction::Vertical)
    .constraints(
      [
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
      ]
      .as_ref(),
    )
    .split(r);
  Layout::default()
    .direction(Direction::Horizontal)
    .constraints(
      [
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
      ]
      .as_ref(),
    )
    .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn state_for(schema: serde_json::Value) -> AppState {
    AppState::new(FormSession::new(schema), PathBuf::from("unused.json"))
  }

  #[test]
  fn rows_follow_document_order() {
    let state = state_for(json!({
      "type": "object",
      "properties": { "a": { "type": "string" }, "b": { "type": "integer" } }
    }));
    let paths: Vec<String> = state
      .rows
      .iter()
      .filter_map(|r| state.session.tree.node(r.id))
      .map(|n| n.path.clone())
      .collect();
    assert_eq!(paths, vec!["a".to_string(), "b".to_string()]);
  }

  #[test]
  fn remove_item_finds_enclosing_array() {
    let mut state = state_for(json!({
      "type": "object",
      "properties": {
        "tags": { "type": "array", "items": { "type": "object", "properties": { "v": { "type": "string" } } } }
      }
    }));
    state.session.add_array_item("tags").expect("add");
    state.refresh_rows();
    let leaf = state.session.tree.find("tags.0.v").expect("item field");
    assert_eq!(array_item_of(&state.session.tree, leaf), Some(("tags".to_string(), 0)));
    assert_eq!(array_at_or_above(&state.session.tree, leaf), Some("tags".to_string()));
  }
}
