use std::collections::HashMap;
use std::future::Future;

use anyhow::{anyhow, Context};
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::response::Html;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chartscope_contracts::analysis::StyleAnalysis;
use chartscope_contracts::history::HistoryRecord;
use chartscope_contracts::styles::{StyleCatalog, StyleSummary};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::config::MAX_UPLOAD_BYTES;
use crate::error::ApiError;
use crate::state::AppState;
use crate::uploads::{self, UploadedImage};

const INDEX_HTML: &str = include_str!("../resources/index.html");

const NO_IMAGES_FIELD: &str = "没有上传图片";
const NO_FILE_SELECTED: &str = "没有选择文件";
const NO_STYLE_SELECTED: &str = "没有选择分析风格";
const DELETE_FAILED: &str = "删除失败";
const RENAME_FAILED: &str = "更新失败";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/styles", get(list_styles))
        .route("/api/analyze", post(analyze))
        .route("/api/history", get(list_history))
        .route("/api/history/{id}", delete(delete_history))
        .route("/api/history/{id}/name", put(rename_history))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Serves `state` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .context("failed to resolve local HTTP address")?;
    tracing::info!(%addr, "chartscope listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server stopped with error")
}

#[derive(Debug, Serialize)]
struct StylesResponse {
    styles: Vec<StyleSummary>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    history: Vec<HistoryRecord>,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    success: bool,
    analyses: Vec<StyleAnalysis>,
    history_id: String,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

impl SuccessResponse {
    fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RenameRequest {
    #[serde(default)]
    name: String,
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn list_styles(State(state): State<AppState>) -> Json<StylesResponse> {
    Json(StylesResponse {
        styles: state.analyzer().catalog().list(),
    })
}

async fn analyze(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let form = AnalyzeForm::read(multipart?).await?;
    let images = form.validate()?;
    tracing::info!(
        images = images.len(),
        styles = form.styles.len(),
        provider = state.analyzer().provider_name(),
        "analyze request"
    );
    let response = blocking(move || run_analysis(&state, &form, &images)).await?;
    Ok(Json(response))
}

async fn list_history(State(state): State<AppState>) -> Result<Json<HistoryResponse>, ApiError> {
    let history = blocking(move || Ok(state.history().list()?)).await?;
    Ok(Json(HistoryResponse { history }))
}

async fn delete_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let log_id = id.clone();
    let removed = blocking(move || Ok(state.history().remove(&id)?)).await?;
    if !removed {
        return Err(ApiError::NotFound(DELETE_FAILED.to_string()));
    }
    tracing::info!(id = %log_id, "history record deleted");
    Ok(SuccessResponse::ok())
}

async fn rename_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<RenameRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Json(request) = body?;
    let log_id = id.clone();
    let renamed = blocking(move || Ok(state.history().rename(&id, &request.name)?)).await?;
    if !renamed {
        return Err(ApiError::NotFound(RENAME_FAILED.to_string()));
    }
    tracing::info!(id = %log_id, "history record renamed");
    Ok(SuccessResponse::ok())
}

async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::Internal(anyhow!("blocking task failed: {err}")))?
}

/// Saves the uploads, then analyzes each style in request order; the first
/// failing style aborts the request and nothing is written to history.
fn run_analysis(
    state: &AppState,
    form: &AnalyzeForm,
    images: &[UploadedImage],
) -> Result<AnalyzeResponse, ApiError> {
    let saved = uploads::save_all(state.uploads_dir(), images, Local::now())?;

    let mut analyses = Vec::with_capacity(form.styles.len());
    for style_key in &form.styles {
        let result = state.analyzer().analyze(
            &saved,
            style_key,
            &form.context,
            form.template_for(style_key),
        );
        match result.into_result() {
            Ok(analysis) => analyses.push(analysis),
            Err(message) => {
                tracing::warn!(style = %style_key, error = %message, "style analysis failed");
                return Err(ApiError::Analysis(message));
            }
        }
    }

    let history_id =
        state
            .history()
            .append(saved, analyses.clone(), &form.context, &form.name)?;
    tracing::info!(id = %history_id, analyses = analyses.len(), "history record saved");
    Ok(AnalyzeResponse {
        success: true,
        analyses,
        history_id,
    })
}

#[derive(Debug, Default)]
struct AnalyzeForm {
    images: Option<Vec<UploadedImage>>,
    styles: Vec<String>,
    context: String,
    name: String,
    templates: HashMap<String, String>,
}

impl AnalyzeForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(field_name) = field.name().map(str::to_string) else {
                continue;
            };
            match field_name.as_str() {
                "images" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let bytes = field.bytes().await?.to_vec();
                    form.images
                        .get_or_insert_with(Vec::new)
                        .push(UploadedImage { file_name, bytes });
                }
                "styles" => form.styles.push(field.text().await?),
                "context" => form.context = field.text().await?,
                "name" => form.name = field.text().await?,
                other if other.starts_with("template_") => {
                    let key = other.to_string();
                    form.templates.insert(key, field.text().await?);
                }
                _ => {}
            }
        }
        Ok(form)
    }

    /// Returns the uploads that carry a file name.
    fn validate(&self) -> Result<Vec<UploadedImage>, ApiError> {
        let Some(images) = &self.images else {
            return Err(ApiError::BadRequest(NO_IMAGES_FIELD.to_string()));
        };
        let named = images
            .iter()
            .filter(|image| !image.file_name.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>();
        if named.is_empty() {
            return Err(ApiError::BadRequest(NO_FILE_SELECTED.to_string()));
        }
        if self.styles.is_empty() {
            return Err(ApiError::BadRequest(NO_STYLE_SELECTED.to_string()));
        }
        Ok(named)
    }

    fn template_for(&self, style_key: &str) -> &str {
        StyleCatalog::template_field(style_key)
            .and_then(|field| self.templates.get(&field))
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::{Path, PathBuf};

    use chartscope_contracts::history::HistoryStore;
    use chartscope_engine::{AnalysisMode, Analyzer, ClaudeConfig, MISSING_API_KEY_MESSAGE};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use reqwest::multipart::{Form, Part};
    use reqwest::StatusCode;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use super::serve;
    use crate::config::MAX_UPLOAD_BYTES;
    use crate::state::AppState;

    struct TestServer {
        base: String,
        uploads_dir: PathBuf,
        history: PathBuf,
        http: reqwest::Client,
        _temp: TempDir,
    }

    impl TestServer {
        async fn start(mode: AnalysisMode) -> anyhow::Result<Self> {
            let temp = tempfile::tempdir()?;
            let uploads_dir = temp.path().join("uploads");
            let data_dir = temp.path().join("data");
            std::fs::create_dir_all(&uploads_dir)?;
            let store = HistoryStore::in_dir(&data_dir);
            let history = store.path().to_path_buf();
            let state = AppState::new(
                Analyzer::from_mode(mode, ClaudeConfig::default())?,
                store,
                uploads_dir.clone(),
            );

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
            let addr = listener.local_addr()?;
            tokio::spawn(serve(listener, state, std::future::pending()));

            Ok(Self {
                base: format!("http://{addr}"),
                uploads_dir,
                history,
                http: reqwest::Client::new(),
                _temp: temp,
            })
        }

        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base)
        }

        async fn post_form(&self, form: Form) -> anyhow::Result<(StatusCode, Value)> {
            let response = self
                .http
                .post(self.url("/api/analyze"))
                .multipart(form)
                .send()
                .await?;
            let status = response.status();
            Ok((status, response.json::<Value>().await?))
        }

        async fn history(&self) -> anyhow::Result<Vec<Value>> {
            let body = self
                .http
                .get(self.url("/api/history"))
                .send()
                .await?
                .json::<Value>()
                .await?;
            Ok(body["history"].as_array().cloned().unwrap_or_default())
        }
    }

    fn png_bytes() -> anyhow::Result<Vec<u8>> {
        let chart = RgbImage::from_fn(8, 4, |x, y| {
            if y == 3 - x / 2 {
                Rgb([220, 40, 40])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(chart).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    fn chart_part(file_name: &str) -> anyhow::Result<Part> {
        Ok(Part::bytes(png_bytes()?)
            .file_name(file_name.to_string())
            .mime_str("image/png")?)
    }

    fn files_in(dir: &Path) -> anyhow::Result<usize> {
        Ok(std::fs::read_dir(dir)?.count())
    }

    #[tokio::test]
    async fn analyze_in_demo_mode_saves_history() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Demo).await?;
        let form = Form::new()
            .part("images", chart_part("cpu.png")?)
            .text("styles", "formal_tech")
            .text("context", "凌晨发布了新版本")
            .text("name", "CPU 周检");

        let (status, body) = server.post_form(form).await?;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["success"], true);
        let analyses = body["analyses"].as_array().cloned().unwrap_or_default();
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0]["style"], "正式-技术视角");
        assert_eq!(analyses[0]["success"], true);
        let text = analyses[0]["analysis"].as_str().unwrap_or_default();
        assert!(text.contains("凌晨发布了新版本"));
        assert!(text.contains("演示模式"));

        let history = server.history().await?;
        assert_eq!(history.len(), 1);
        let record = &history[0];
        assert_eq!(record["id"], body["history_id"]);
        assert_eq!(record["name"], "CPU 周检");
        assert_eq!(record["user_context"], "凌晨发布了新版本");
        assert_eq!(record["analyses"], json!(analyses));
        let saved = record["images"][0].as_str().unwrap_or_default();
        assert!(saved.ends_with("_cpu.png"), "{saved}");
        assert!(Path::new(saved).starts_with(&server.uploads_dir));
        assert!(Path::new(saved).is_file());
        Ok(())
    }

    #[tokio::test]
    async fn analyze_without_styles_is_rejected() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Demo).await?;
        let form = Form::new().part("images", chart_part("mem.png")?);

        let (status, body) = server.post_form(form).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "没有选择分析风格"}));
        assert!(server.history().await?.is_empty());
        assert!(!server.history.exists());
        assert_eq!(files_in(&server.uploads_dir)?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn analyze_without_images_field_is_rejected() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Demo).await?;
        let form = Form::new().text("styles", "formal_tech");

        let (status, body) = server.post_form(form).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "没有上传图片");
        Ok(())
    }

    #[tokio::test]
    async fn analyze_over_body_limit_is_rejected() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Demo).await?;
        let oversized = Part::bytes(vec![0u8; MAX_UPLOAD_BYTES + 1024 * 1024])
            .file_name("huge.png")
            .mime_str("image/png")?;
        let form = Form::new()
            .text("styles", "formal_tech")
            .part("images", oversized);

        let (status, body) = server.post_form(form).await?;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!body["error"].as_str().unwrap_or_default().is_empty(), "{body}");
        assert!(server.history().await?.is_empty());
        assert_eq!(files_in(&server.uploads_dir)?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn analyze_with_unnamed_file_is_rejected() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Demo).await?;
        let form = Form::new()
            .part("images", Part::bytes(png_bytes()?))
            .text("styles", "formal_tech");

        let (status, body) = server.post_form(form).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "没有选择文件");
        Ok(())
    }

    #[tokio::test]
    async fn analyze_keeps_style_order_and_applies_report_template() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Demo).await?;
        let form = Form::new()
            .part("images", chart_part("qps.png")?)
            .part("images", chart_part("latency.png")?)
            .text("styles", "daily_report")
            .text("styles", "concise_tech")
            .text("template_daily", "## 今日概况\n## 明日计划");

        let (status, body) = server.post_form(form).await?;
        assert_eq!(status, StatusCode::OK, "{body}");
        let analyses = body["analyses"].as_array().cloned().unwrap_or_default();
        let styles = analyses
            .iter()
            .map(|analysis| analysis["style"].as_str().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(styles, vec!["日报格式", "简洁-技术视角"]);

        let daily = analyses[0]["analysis"].as_str().unwrap_or_default();
        assert!(daily.contains("## 今日概况\n## 明日计划"));
        let concise = analyses[1]["analysis"].as_str().unwrap_or_default();
        assert!(!concise.contains("## 今日概况"));

        let history = server.history().await?;
        assert_eq!(history[0]["images"].as_array().map(Vec::len), Some(2));
        assert!(history[0]["name"]
            .as_str()
            .unwrap_or_default()
            .starts_with("分析_"));
        Ok(())
    }

    #[tokio::test]
    async fn live_mode_without_key_fails_and_skips_history() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Live).await?;
        let form = Form::new()
            .part("images", chart_part("disk.png")?)
            .text("styles", "formal_tech");

        let (status, body) = server.post_form(form).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": MISSING_API_KEY_MESSAGE}));
        assert!(server.history().await?.is_empty());
        assert_eq!(files_in(&server.uploads_dir)?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn rename_then_delete_history_record() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Demo).await?;
        let form = Form::new()
            .part("images", chart_part("net.png")?)
            .text("styles", "weekly_report");
        let (_, body) = server.post_form(form).await?;
        let id = body["history_id"].as_str().unwrap_or_default().to_string();

        let renamed = server
            .http
            .put(server.url(&format!("/api/history/{id}/name")))
            .json(&json!({"name": "网络周报"}))
            .send()
            .await?;
        assert_eq!(renamed.status(), StatusCode::OK);
        assert_eq!(renamed.json::<Value>().await?, json!({"success": true}));
        assert_eq!(server.history().await?[0]["name"], "网络周报");

        let cleared = server
            .http
            .put(server.url(&format!("/api/history/{id}/name")))
            .json(&json!({}))
            .send()
            .await?;
        assert_eq!(cleared.status(), StatusCode::OK);
        assert_eq!(server.history().await?[0]["name"], "");

        let deleted = server
            .http
            .delete(server.url(&format!("/api/history/{id}")))
            .send()
            .await?;
        assert_eq!(deleted.status(), StatusCode::OK);
        assert!(server
            .history()
            .await?
            .iter()
            .all(|record| record["id"] != id.as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn history_mutations_without_file_are_not_found() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Demo).await?;

        let deleted = server
            .http
            .delete(server.url("/api/history/20240101_000000"))
            .send()
            .await?;
        assert_eq!(deleted.status(), StatusCode::NOT_FOUND);
        assert_eq!(deleted.json::<Value>().await?, json!({"error": "删除失败"}));

        let renamed = server
            .http
            .put(server.url("/api/history/20240101_000000/name"))
            .json(&json!({"name": "x"}))
            .send()
            .await?;
        assert_eq!(renamed.status(), StatusCode::NOT_FOUND);
        assert_eq!(renamed.json::<Value>().await?, json!({"error": "更新失败"}));
        assert!(!server.history.exists());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_history_file_is_internal_error() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Demo).await?;
        if let Some(parent) = server.history.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&server.history, "{not json")?;

        let response = server.http.get(server.url("/api/history")).send().await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.json::<Value>().await?;
        assert!(body["error"]
            .as_str()
            .unwrap_or_default()
            .contains("malformed history file"));
        Ok(())
    }

    #[tokio::test]
    async fn styles_and_index_are_served() -> anyhow::Result<()> {
        let server = TestServer::start(AnalysisMode::Demo).await?;

        let body = server
            .http
            .get(server.url("/api/styles"))
            .send()
            .await?
            .json::<Value>()
            .await?;
        let styles = body["styles"].as_array().cloned().unwrap_or_default();
        assert_eq!(styles.len(), 12);
        assert_eq!(styles[0], json!({"key": "formal_tech", "name": "正式-技术视角"}));
        assert_eq!(styles[11]["key"], "monthly_report");

        let index = server.http.get(server.url("/")).send().await?;
        assert_eq!(index.status(), StatusCode::OK);
        assert!(index.text().await?.contains("/api/analyze"));
        Ok(())
    }
}
