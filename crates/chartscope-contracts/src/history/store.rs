use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use chrono::{DateTime, Local};

use super::record::HistoryRecord;
use crate::analysis::StyleAnalysis;

pub const HISTORY_FILE_NAME: &str = "history.json";

/// JSON-array history file, newest record first.
///
/// Every operation reads the whole file, mutates it and writes it back while
/// holding `lock`, so concurrent requests cannot interleave their cycles.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(HISTORY_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &self,
        images: Vec<String>,
        analyses: Vec<StyleAnalysis>,
        user_context: &str,
        name: &str,
    ) -> anyhow::Result<String> {
        self.append_at(Local::now(), images, analyses, user_context, name)
    }

    pub fn list(&self) -> anyhow::Result<Vec<HistoryRecord>> {
        let _guard = self.guard()?;
        Ok(self.read_records()?.unwrap_or_default())
    }

    /// Drops every record with `id`.
    ///
    /// Returns whether the history file existed, not whether anything matched.
    pub fn remove(&self, id: &str) -> anyhow::Result<bool> {
        let _guard = self.guard()?;
        let Some(mut records) = self.read_records()? else {
            return Ok(false);
        };
        records.retain(|record| record.id != id);
        self.write_records(&records)?;
        Ok(true)
    }

    /// Renames the first record with `id`; same return contract as [`Self::remove`].
    pub fn rename(&self, id: &str, new_name: &str) -> anyhow::Result<bool> {
        let _guard = self.guard()?;
        let Some(mut records) = self.read_records()? else {
            return Ok(false);
        };
        if let Some(record) = records.iter_mut().find(|record| record.id == id) {
            record.name = new_name.to_string();
        }
        self.write_records(&records)?;
        Ok(true)
    }

    fn append_at(
        &self,
        now: DateTime<Local>,
        images: Vec<String>,
        analyses: Vec<StyleAnalysis>,
        user_context: &str,
        name: &str,
    ) -> anyhow::Result<String> {
        let _guard = self.guard()?;
        let mut records = self.read_records()?.unwrap_or_default();
        let record = HistoryRecord::new(now, images, analyses, user_context, name);
        let id = record.id.clone();
        records.insert(0, record);
        self.write_records(&records)?;
        Ok(id)
    }

    fn guard(&self) -> anyhow::Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| anyhow::anyhow!("history store lock poisoned"))
    }

    fn read_records(&self) -> anyhow::Result<Option<Vec<HistoryRecord>>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed reading {}", self.path.display()))
            }
        };
        let records = serde_json::from_str(&raw)
            .with_context(|| format!("malformed history file {}", self.path.display()))?;
        Ok(Some(records))
    }

    fn write_records(&self, records: &[HistoryRecord]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        let payload = serde_json::to_string_pretty(records)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, payload)
            .with_context(|| format!("failed writing {}", tmp_path.display()))?;
        if let Err(rename_err) = fs::rename(&tmp_path, &self.path) {
            if !self.path.exists() {
                return Err(rename_err)
                    .with_context(|| format!("failed replacing {}", self.path.display()));
            }
            fs::remove_file(&self.path)
                .with_context(|| format!("failed removing {}", self.path.display()))?;
            fs::rename(&tmp_path, &self.path)
                .with_context(|| format!("failed replacing {}", self.path.display()))?;
        }
        Ok(())
    }
}
