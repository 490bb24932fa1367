use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Result};
use chartscope_contracts::analysis::{AnalysisResult, StyleAnalysis};
use chartscope_contracts::styles::{Style, StyleCatalog};

pub mod codec;

mod claude;
mod demo;

pub use claude::{ClaudeConfig, ClaudeProvider, DEFAULT_CLAUDE_MODEL, MISSING_API_KEY_MESSAGE};
pub use codec::EncodedImage;
pub use demo::DemoProvider;

const MARKDOWN_DIRECTIVE: &str = "\n\n请用markdown格式输出分析结果。";
const USER_CONTEXT_LABEL: &str = "\n\n用户补充说明：";
const TEMPLATE_DIRECTIVE: &str = "\n\n请严格按照以下模板的结构和标题组织分析结果：\n";
const ERROR_MAX_CHARS: usize = 1024;

/// Everything a provider needs for one style: encoded images plus the composed prompt.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub style: Style,
    pub images: Vec<EncodedImage>,
    pub prompt: String,
    pub user_context: String,
    pub custom_template: String,
}

pub trait AnalysisProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fails fast, before any image is read, when the provider cannot run at all.
    fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// Live when an API key is configured, demo otherwise.
    #[default]
    Auto,
    Live,
    Demo,
}

impl AnalysisMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Live => "live",
            Self::Demo => "demo",
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "live" | "claude" => Ok(Self::Live),
            "demo" | "canned" | "dryrun" => Ok(Self::Demo),
            other => bail!("unknown analysis mode '{other}' (expected auto, live or demo)"),
        }
    }
}

pub fn select_provider(
    mode: AnalysisMode,
    claude: ClaudeConfig,
) -> Result<Box<dyn AnalysisProvider>> {
    let live = match mode {
        AnalysisMode::Auto => claude.has_api_key(),
        AnalysisMode::Live => true,
        AnalysisMode::Demo => false,
    };
    if live {
        if !claude.has_api_key() {
            tracing::warn!("live analysis mode selected without an API key; every call will fail");
        }
        tracing::info!(mode = mode.as_str(), model = %claude.model, "using Claude analysis provider");
        Ok(Box::new(ClaudeProvider::new(claude)))
    } else {
        tracing::info!(mode = mode.as_str(), "using demo analysis provider");
        Ok(Box::new(DemoProvider::new()?))
    }
}

pub struct Analyzer {
    catalog: StyleCatalog,
    provider: Box<dyn AnalysisProvider>,
}

impl Analyzer {
    pub fn new(catalog: StyleCatalog, provider: Box<dyn AnalysisProvider>) -> Self {
        Self { catalog, provider }
    }

    pub fn from_mode(mode: AnalysisMode, claude: ClaudeConfig) -> Result<Self> {
        Ok(Self::new(
            StyleCatalog::builtin(),
            select_provider(mode, claude)?,
        ))
    }

    pub fn catalog(&self) -> &StyleCatalog {
        &self.catalog
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Analyzes `image_paths` in one style. Never fails: problems come back as
    /// [`AnalysisResult::Failed`] carrying the error message.
    pub fn analyze<P: AsRef<Path>>(
        &self,
        image_paths: &[P],
        style_key: &str,
        user_context: &str,
        custom_template: &str,
    ) -> AnalysisResult {
        let style = self.catalog.resolve(style_key);
        let outcome = self
            .build_request(image_paths, style, user_context, custom_template)
            .and_then(|request| self.provider.analyze(&request));
        match outcome {
            Ok(text) => AnalysisResult::Completed(StyleAnalysis::new(text, style.name.clone())),
            Err(err) => {
                let message = error_chain_text(&err, ERROR_MAX_CHARS);
                tracing::debug!(
                    provider = self.provider.name(),
                    style = %style.key,
                    error = %message,
                    "style analysis failed"
                );
                AnalysisResult::failed(message)
            }
        }
    }

    fn build_request<P: AsRef<Path>>(
        &self,
        image_paths: &[P],
        style: &Style,
        user_context: &str,
        custom_template: &str,
    ) -> Result<AnalysisRequest> {
        self.provider.check_ready()?;
        if image_paths.is_empty() {
            bail!("no images to analyze");
        }
        let images = image_paths
            .iter()
            .map(|path| EncodedImage::load(path.as_ref()))
            .collect::<Result<Vec<EncodedImage>>>()?;
        Ok(AnalysisRequest {
            style: style.clone(),
            images,
            prompt: compose_prompt(style, user_context, custom_template),
            user_context: user_context.to_string(),
            custom_template: custom_template.to_string(),
        })
    }
}

pub fn compose_prompt(style: &Style, user_context: &str, custom_template: &str) -> String {
    let mut prompt = style.prompt.clone();
    if let Some(template) = provided(custom_template) {
        prompt.push_str(TEMPLATE_DIRECTIVE);
        prompt.push_str(template);
    }
    if let Some(context) = provided(user_context) {
        prompt.push_str(USER_CONTEXT_LABEL);
        prompt.push_str(context);
    }
    prompt.push_str(MARKDOWN_DIRECTIVE);
    prompt
}

/// Trimmed form input; whitespace-only counts as absent.
pub(crate) fn provided(text: &str) -> Option<&str> {
    Some(text.trim()).filter(|trimmed| !trimmed.is_empty())
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(": "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
