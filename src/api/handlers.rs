//! HTTP handlers that turn requests into generation jobs

use axum::{
    extract::{FromRequest, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::templates;
use crate::dispatch::{ComposeJob, ImageJob, Job, TextToImageJob};
use crate::error::{AppError, Result};
use crate::AppState;

const DEFAULT_RESOLUTION: &str = "1K";

/// JSON body extractor whose rejections render as [`AppError`]
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageResult {
    pub file_url: String,
}

#[derive(Debug, Deserialize)]
pub struct TextToImageBody {
    pub prompt: String,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
}

/// Body of `filter` and `adjust` requests
#[derive(Debug, Deserialize)]
pub struct SourceImageBody {
    pub prompt: String,
    pub image_url: String,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub x: i64,
    pub y: i64,
    #[serde(flatten)]
    pub source: SourceImageBody,
}

#[derive(Debug, Deserialize)]
pub struct ComposeBody {
    pub prompt: String,
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub image_paths: Vec<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub channel_connected: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

fn resolution_or_default(resolution: Option<String>) -> Option<String> {
    Some(resolution.unwrap_or_else(|| DEFAULT_RESOLUTION.to_string()))
}

fn image_job(body: SourceImageBody, prompt: String) -> ImageJob {
    let mut job = ImageJob::new(prompt, body.image_url);
    job.image_path = body.image_path;
    if let Some(aspect_ratio) = body.aspect_ratio {
        job.aspect_ratio = aspect_ratio;
    }
    if let Some(output_format) = body.output_format {
        job.output_format = output_format;
    }
    job.resolution = resolution_or_default(body.resolution);
    job
}

async fn dispatch(state: &AppState, job: Job) -> Result<Json<ImageResult>> {
    job.validate().map_err(AppError::InvalidRequest)?;
    info!(mode = job.mode(), "Dispatching generation request");
    let file_url = state.dispatcher.submit_default(&job).await?;
    Ok(Json(ImageResult { file_url }))
}

pub async fn text_to_image(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<TextToImageBody>,
) -> Result<Json<ImageResult>> {
    let mut job = TextToImageJob::new(body.prompt);
    if let Some(aspect_ratio) = body.aspect_ratio {
        job.aspect_ratio = aspect_ratio;
    }
    if let Some(output_format) = body.output_format {
        job.output_format = output_format;
    }
    job.resolution = resolution_or_default(body.resolution);
    dispatch(&state, Job::TextToImage(job)).await
}

pub async fn edit(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<EditBody>,
) -> Result<Json<ImageResult>> {
    let prompt = templates::retouch(&body.source.prompt, body.x, body.y);
    dispatch(&state, Job::Edit(image_job(body.source, prompt))).await
}

pub async fn filter(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<SourceImageBody>,
) -> Result<Json<ImageResult>> {
    let prompt = templates::filter(&body.prompt);
    dispatch(&state, Job::Filter(image_job(body, prompt))).await
}

pub async fn adjust(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<SourceImageBody>,
) -> Result<Json<ImageResult>> {
    let prompt = templates::adjust(&body.prompt);
    dispatch(&state, Job::Adjust(image_job(body, prompt))).await
}

pub async fn compose(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<ComposeBody>,
) -> Result<Json<ImageResult>> {
    if body.image_urls.is_empty() {
        return Err(AppError::InvalidRequest(
            "at least one image is required".to_string(),
        ));
    }

    let job = ComposeJob {
        prompt: templates::compose(&body.prompt),
        image_urls: body.image_urls,
        image_path: body.image_paths.into_iter().next(),
        aspect_ratio: body.aspect_ratio.unwrap_or_else(|| "auto".to_string()),
        output_format: body.output_format.unwrap_or_else(|| "png".to_string()),
        resolution: resolution_or_default(body.resolution),
    };
    dispatch(&state, Job::Compose(job)).await
}

/// Accepts a job exactly as it goes on the queue
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    ApiJson(job): ApiJson<Job>,
) -> Result<Json<ImageResult>> {
    dispatch(&state, job).await
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let channel_connected = state.channel.is_connected();
    Json(HealthResponse {
        status: if channel_connected { "ok" } else { "degraded" },
        channel_connected,
        timestamp: chrono::Utc::now(),
    })
}
