use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_STYLE_KEY: &str = "formal_tech";

const REPORT_SUFFIX: &str = "_report";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Style {
    pub key: String,
    pub name: String,
    pub prompt: String,
}

impl Style {
    pub fn is_report(&self) -> bool {
        self.key.ends_with(REPORT_SUFFIX)
    }
}

/// Public `{key, name}` view of a style, as listed by `/api/styles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSummary {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct StyleCatalog {
    styles: IndexMap<String, Style>,
}

impl StyleCatalog {
    pub fn builtin() -> Self {
        Self {
            styles: builtin_styles(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Style> {
        self.styles.get(key)
    }

    /// Looks up `key`, falling back to the default style for unknown keys.
    pub fn resolve(&self, key: &str) -> &Style {
        self.styles
            .get(key)
            .or_else(|| self.styles.get(DEFAULT_STYLE_KEY))
            .or_else(|| self.styles.values().next())
            .expect("style catalog is never empty")
    }

    pub fn list(&self) -> Vec<StyleSummary> {
        self.styles
            .values()
            .map(|style| StyleSummary {
                key: style.key.clone(),
                name: style.name.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    /// Form field that may carry a custom template for `key`.
    ///
    /// Only report styles take templates: `daily_report` reads `template_daily`.
    pub fn template_field(key: &str) -> Option<String> {
        let prefix = key.strip_suffix(REPORT_SUFFIX)?;
        if prefix.is_empty() {
            return None;
        }
        Some(format!("template_{prefix}"))
    }
}

impl Default for StyleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_styles() -> IndexMap<String, Style> {
    let mut map = IndexMap::new();

    let mut insert = |key: &str, name: &str, prompt: &str| {
        map.insert(
            key.to_string(),
            Style {
                key: key.to_string(),
                name: name.to_string(),
                prompt: prompt.to_string(),
            },
        );
    };

    insert(
        "formal_tech",
        "正式-技术视角",
        "请以正式专业的语气，从技术角度分析这些趋势图。重点关注数据指标、技术参数、性能表现等。",
    );
    insert(
        "formal_business",
        "正式-业务视角",
        "请以正式专业的语气，从业务角度分析这些趋势图。重点关注业务影响、增长趋势、关键指标等。",
    );
    insert(
        "formal_management",
        "正式-管理视角",
        "请以正式专业的语气，从管理角度分析这些趋势图。重点关注整体表现、风险评估、决策建议等。",
    );
    insert(
        "concise_tech",
        "简洁-技术视角",
        "请以简洁明了的方式，从技术角度总结这些趋势图的关键信息。只突出重点数据和技术指标。",
    );
    insert(
        "concise_business",
        "简洁-业务视角",
        "请以简洁明了的方式，从业务角度总结这些趋势图的关键信息。只突出业务核心数据。",
    );
    insert(
        "concise_management",
        "简洁-管理视角",
        "请以简洁明了的方式，从管理角度总结这些趋势图的关键信息。只突出管理决策要点。",
    );
    insert(
        "detailed_tech",
        "详细-技术视角",
        "请以详尽的方式，从技术角度深入分析这些趋势图。包括数据变化原因、技术细节、潜在问题等。",
    );
    insert(
        "detailed_business",
        "详细-业务视角",
        "请以详尽的方式，从业务角度深入分析这些趋势图。包括业务影响分析、市场洞察、增长机会等。",
    );
    insert(
        "detailed_management",
        "详细-管理视角",
        "请以详尽的方式，从管理角度深入分析这些趋势图。包括综合评估、风险机会、具体行动建议等。",
    );
    insert(
        "daily_report",
        "日报格式",
        "请以日报格式分析这些趋势图。包括：今日数据概况、关键指标、异常情况、明日关注点。使用简洁的格式。",
    );
    insert(
        "weekly_report",
        "周报格式",
        "请以周报格式分析这些趋势图。包括：本周概况、主要趋势、重点成果、下周计划。",
    );
    insert(
        "monthly_report",
        "月报格式",
        "请以月报格式分析这些趋势图。包括：月度总结、趋势分析、亮点与问题、下月重点。",
    );

    map
}
