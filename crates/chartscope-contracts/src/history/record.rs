use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::analysis::StyleAnalysis;

const DEFAULT_NAME_PREFIX: &str = "分析_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub user_context: String,
    #[serde(default)]
    pub analyses: Vec<StyleAnalysis>,
}

impl HistoryRecord {
    /// Builds a record whose id, timestamp and default name share one clock reading.
    pub fn new(
        now: DateTime<Local>,
        images: Vec<String>,
        analyses: Vec<StyleAnalysis>,
        user_context: &str,
        name: &str,
    ) -> Self {
        let name = if name.is_empty() {
            default_name(now)
        } else {
            name.to_string()
        };
        Self {
            id: record_id(now),
            timestamp: iso_timestamp(now),
            name,
            images,
            user_context: user_context.to_string(),
            analyses,
        }
    }
}

fn record_id(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

fn iso_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn default_name(now: DateTime<Local>) -> String {
    format!("{DEFAULT_NAME_PREFIX}{}", now.format("%Y-%m-%d %H:%M"))
}
