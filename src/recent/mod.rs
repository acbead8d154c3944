use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_STATE_DIR: &str = ".formsmith";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentFile {
    pub filename: String,
    pub data: Value,
    pub saved_unix_ms: u128,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentFiles {
    #[serde(default)]
    pub schema: Option<RecentFile>,
    #[serde(default)]
    pub options: Option<RecentFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecentKind {
    Schema,
    Options,
}

pub fn recent_path(state_dir: &Path) -> PathBuf {
    state_dir.join("recent.json")
}

pub fn read_recent(state_dir: &Path) -> RecentFiles {
    fs::read_to_string(recent_path(state_dir))
        .ok()
        .and_then(|data| serde_json::from_str(&data).ok())
        .unwrap_or_default()
}

pub fn write_recent(state_dir: &Path, recent: &RecentFiles) -> Result<()> {
    fs::create_dir_all(state_dir)?;
    let json = serde_json::to_string_pretty(recent)?;
    fs::write(recent_path(state_dir), json)?;
    Ok(())
}

pub fn remember(state_dir: &Path, kind: RecentKind, filename: &str, data: &Value) -> Result<()> {
    let mut recent = read_recent(state_dir);
    let entry = Some(RecentFile {
        filename: filename.to_string(),
        data: data.clone(),
        saved_unix_ms: now_unix_ms(),
    });
    match kind {
        RecentKind::Schema => recent.schema = entry,
        RecentKind::Options => recent.options = entry,
    }
    write_recent(state_dir, &recent)
}

pub fn last_schema_file(state_dir: &Path) -> Option<RecentFile> {
    read_recent(state_dir).schema
}

pub fn last_options_file(state_dir: &Path) -> Option<RecentFile> {
    read_recent(state_dir).options
}

pub fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
