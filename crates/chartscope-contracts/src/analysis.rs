use serde::{Deserialize, Serialize};

/// One successful style analysis, as returned to clients and kept in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleAnalysis {
    pub success: bool,
    pub analysis: String,
    pub style: String,
}

impl StyleAnalysis {
    pub fn new(analysis: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            success: true,
            analysis: analysis.into(),
            style: style.into(),
        }
    }
}

/// Outcome of analyzing one style: `{success, analysis, style}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisResult {
    Completed(StyleAnalysis),
    Failed { error: String },
}

impl AnalysisResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Completed(_) => None,
            Self::Failed { error } => Some(error.as_str()),
        }
    }

    pub fn into_result(self) -> Result<StyleAnalysis, String> {
        match self {
            Self::Completed(analysis) => Ok(analysis),
            Self::Failed { error } => Err(error),
        }
    }
}
