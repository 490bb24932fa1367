use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chartscope_contracts::history::HistoryStore;
use chartscope_engine::Analyzer;

use crate::config::ServerConfig;

/// Shared handler state; cloned per request.
#[derive(Clone)]
pub struct AppState {
    analyzer: Arc<Analyzer>,
    history: Arc<HistoryStore>,
    uploads_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(analyzer: Analyzer, history: HistoryStore, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            history: Arc::new(history),
            uploads_dir: Arc::new(uploads_dir.into()),
        }
    }

    /// Builds the provider and store, creating the upload and data directories first.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        config.ensure_dirs()?;
        let analyzer = Analyzer::from_mode(config.mode, config.claude.clone())?;
        let history = HistoryStore::in_dir(&config.data_dir);
        tracing::info!(
            provider = analyzer.provider_name(),
            history = %history.path().display(),
            uploads = %config.uploads_dir.display(),
            "state ready"
        );
        Ok(Self::new(analyzer, history, config.uploads_dir.clone()))
    }

    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }
}
