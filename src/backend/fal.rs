//! FAL image API client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::{ImageBackend, ImageOptions};
use crate::config::FalConfig;
use crate::error::{AppError, Result};

/// HTTP client for the FAL text-to-image and edit endpoints
pub struct FalBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

/// Request body shared by both endpoints
#[derive(Debug, Serialize)]
struct FalRequest<'a> {
    prompt: &'a str,
    num_images: u32,
    aspect_ratio: &'a str,
    output_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_urls: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct FalResponse {
    #[serde(default)]
    images: Vec<FalImage>,
}

#[derive(Debug, Deserialize)]
struct FalImage {
    #[serde(default)]
    url: Option<String>,
}

impl FalBackend {
    /// Create a new FAL client from configuration
    pub fn new(config: &FalConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            AppError::ServiceUnavailable("FAL_API_KEY is not configured on the server".to_string())
        })
    }

    async fn post(&self, url: &str, body: &FalRequest<'_>) -> Result<String> {
        let api_key = self.api_key()?;
        debug!(url = %url, aspect_ratio = %body.aspect_ratio, "Calling FAL");

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Key {}", api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("FAL request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "FAL returned an error");
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: FalResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Malformed FAL response: {}", e)))?;

        parsed
            .images
            .into_iter()
            .find_map(|image| image.url.filter(|url| !url.is_empty()))
            .ok_or_else(|| AppError::Internal("FAL did not return an image".to_string()))
    }
}

#[async_trait]
impl ImageBackend for FalBackend {
    fn name(&self) -> &str {
        "fal"
    }

    async fn text_to_image(&self, prompt: &str, options: &ImageOptions) -> Result<String> {
        let body = FalRequest {
            prompt,
            num_images: 1,
            aspect_ratio: &options.aspect_ratio,
            output_format: &options.output_format,
            resolution: options.resolution.as_deref(),
            image_urls: None,
        };
        self.post(&self.base_url, &body).await
    }

    async fn edit_image(
        &self,
        prompt: &str,
        image_urls: &[String],
        options: &ImageOptions,
    ) -> Result<String> {
        let body = FalRequest {
            prompt,
            num_images: 1,
            aspect_ratio: &options.aspect_ratio,
            output_format: &options.output_format,
            resolution: options.resolution.as_deref(),
            image_urls: Some(image_urls),
        };
        self.post(&format!("{}/edit", self.base_url), &body).await
    }
}
