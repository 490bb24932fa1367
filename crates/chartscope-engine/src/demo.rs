use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use chartscope_contracts::styles::DEFAULT_STYLE_KEY;

use crate::{provided, AnalysisProvider, AnalysisRequest};

const DEMO_ANALYSES_JSON: &str = include_str!("../resources/demo_analyses.json");

const DEMO_DISCLAIMER: &str = "\n\n---\n\n*演示模式：以上内容为预设的示例分析，并非模型针对所上传图片生成的真实结果。设置环境变量 CLAUDE_API_KEY 后即可获得实时分析。*";

/// Offline provider that answers with pre-written analyses keyed by style.
#[derive(Debug, Clone)]
pub struct DemoProvider {
    analyses: HashMap<String, String>,
    default_text: String,
}

impl DemoProvider {
    pub fn new() -> Result<Self> {
        Self::from_json(DEMO_ANALYSES_JSON)
    }

    fn from_json(raw: &str) -> Result<Self> {
        let analyses: HashMap<String, String> =
            serde_json::from_str(raw).context("malformed demo analyses resource")?;
        let Some(default_text) = analyses.get(DEFAULT_STYLE_KEY).cloned() else {
            bail!("demo analyses resource has no '{DEFAULT_STYLE_KEY}' entry");
        };
        Ok(Self {
            analyses,
            default_text,
        })
    }

    fn canned_text(&self, style_key: &str) -> &str {
        self.analyses
            .get(style_key)
            .unwrap_or(&self.default_text)
    }
}

impl AnalysisProvider for DemoProvider {
    fn name(&self) -> &str {
        "demo"
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<String> {
        let mut text = String::new();

        if let Some(context) = provided(&request.user_context) {
            text.push_str("> **用户补充说明**：");
            text.push_str(context);
            text.push_str("\n\n");
        }

        let template = provided(&request.custom_template);
        if let Some(template) = template {
            text.push_str("**自定义模板**\n\n");
            text.push_str(template);
            text.push_str("\n\n---\n\n");
        }

        text.push_str(self.canned_text(&request.style.key));

        if template.is_some() {
            text.push_str("\n\n> 以上内容已按照自定义模板的结构整理。");
        }
        text.push_str(DEMO_DISCLAIMER);
        Ok(text)
    }
}
