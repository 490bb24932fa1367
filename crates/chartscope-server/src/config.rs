use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chartscope_engine::{AnalysisMode, ClaudeConfig};

/// Request bodies above this are rejected before the analyze handler runs.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub data_dir: PathBuf,
    pub mode: AnalysisMode,
    pub claude: ClaudeConfig,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid bind address '{}:{}'", self.host, self.port))
    }

    /// Creates the uploads and data directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.uploads_dir, &self.data_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed creating {}", dir.display()))?;
        }
        Ok(())
    }
}
