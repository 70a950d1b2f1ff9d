//! Common traits and types for external image generation APIs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Output formatting shared by every generation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOptions {
    /// Aspect ratio such as `1:1`, `16:9` or `auto`
    pub aspect_ratio: String,

    /// Output encoding: `png`, `jpeg`, `webp`
    pub output_format: String,

    /// Resolution tier (`1K`, `2K`, ...), provider default when absent
    pub resolution: Option<String>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: "1:1".to_string(),
            output_format: "png".to_string(),
            resolution: None,
        }
    }
}

/// Trait for external image generation APIs.
///
/// Errors carry the provider's HTTP status as [`crate::AppError::Upstream`]
/// when it answered with one.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Generate an image from a prompt alone, returning its URL
    async fn text_to_image(&self, prompt: &str, options: &ImageOptions) -> Result<String>;

    /// Edit or compose the images at `image_urls` according to `prompt`,
    /// returning the URL of the result
    async fn edit_image(
        &self,
        prompt: &str,
        image_urls: &[String],
        options: &ImageOptions,
    ) -> Result<String>;
}
