//! Generation jobs as they travel over the work queue

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::backend::traits::ImageOptions;
use crate::error::AppError;

/// Every `mode` value a worker understands
pub const KNOWN_MODES: [&str; 5] = ["text-to-image", "edit", "filter", "adjust", "compose"];

/// Upper bound on source images in one compose job
pub const MAX_COMPOSE_IMAGES: usize = 10;

/// Generation job, discriminated by `mode` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Job {
    TextToImage(TextToImageJob),
    Edit(ImageJob),
    Filter(ImageJob),
    Adjust(ImageJob),
    Compose(ComposeJob),
}

/// Prompt-only generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToImageJob {
    pub prompt: String,
    #[serde(default = "default_square")]
    pub aspect_ratio: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Edit of a single source image (`edit`, `filter` and `adjust`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageJob {
    pub prompt: String,
    pub image_url: String,
    /// Where the same image lives on the API host's disk, if anywhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default = "default_auto")]
    pub aspect_ratio: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Composition of several source images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeJob {
    pub prompt: String,
    pub image_urls: Vec<String>,
    /// Disk location of the first image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default = "default_auto")]
    pub aspect_ratio: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

fn default_square() -> String {
    "1:1".to_string()
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_output_format() -> String {
    "png".to_string()
}

impl TextToImageJob {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: default_square(),
            output_format: default_output_format(),
            resolution: None,
        }
    }

    pub fn options(&self) -> ImageOptions {
        ImageOptions {
            aspect_ratio: self.aspect_ratio.clone(),
            output_format: self.output_format.clone(),
            resolution: self.resolution.clone(),
        }
    }
}

impl ImageJob {
    pub fn new(prompt: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image_url: image_url.into(),
            image_path: None,
            aspect_ratio: default_auto(),
            output_format: default_output_format(),
            resolution: None,
        }
    }

    pub fn options(&self) -> ImageOptions {
        ImageOptions {
            aspect_ratio: self.aspect_ratio.clone(),
            output_format: self.output_format.clone(),
            resolution: self.resolution.clone(),
        }
    }
}

impl ComposeJob {
    pub fn options(&self) -> ImageOptions {
        ImageOptions {
            aspect_ratio: self.aspect_ratio.clone(),
            output_format: self.output_format.clone(),
            resolution: self.resolution.clone(),
        }
    }
}

/// Why a payload taken off the queue is not a usable job
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobDecodeError {
    #[error("payload is not a JSON object: {0}")]
    Malformed(String),

    #[error("job has no mode")]
    MissingMode,

    #[error("unknown mode {0}")]
    UnknownMode(String),

    #[error("invalid {mode} job: {message}")]
    Invalid { mode: String, message: String },
}

impl From<JobDecodeError> for AppError {
    fn from(err: JobDecodeError) -> Self {
        match err {
            JobDecodeError::MissingMode => AppError::UnknownMode("<missing>".to_string()),
            JobDecodeError::UnknownMode(mode) => AppError::UnknownMode(mode),
            other => AppError::InvalidRequest(other.to_string()),
        }
    }
}

impl Job {
    /// Wire name of the job's mode
    pub fn mode(&self) -> &'static str {
        match self {
            Job::TextToImage(_) => "text-to-image",
            Job::Edit(_) => "edit",
            Job::Filter(_) => "filter",
            Job::Adjust(_) => "adjust",
            Job::Compose(_) => "compose",
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode and validate a queue payload.
    ///
    /// The mode is checked before the body so an unknown mode is reported as
    /// such rather than as a generic shape error.
    pub fn decode(bytes: &[u8]) -> Result<Job, JobDecodeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| JobDecodeError::Malformed(e.to_string()))?;

        if !value.is_object() {
            return Err(JobDecodeError::Malformed("expected an object".to_string()));
        }

        let mode = match value.get("mode") {
            None | Some(Value::Null) => return Err(JobDecodeError::MissingMode),
            Some(Value::String(mode)) => mode.clone(),
            Some(other) => return Err(JobDecodeError::UnknownMode(other.to_string())),
        };

        if !KNOWN_MODES.contains(&mode.as_str()) {
            return Err(JobDecodeError::UnknownMode(mode));
        }

        let job: Job = serde_json::from_value(value).map_err(|e| JobDecodeError::Invalid {
            mode: mode.clone(),
            message: e.to_string(),
        })?;
        job.validate().map_err(|message| JobDecodeError::Invalid { mode, message })?;
        Ok(job)
    }

    /// Field checks serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        let prompt = match self {
            Job::TextToImage(job) => &job.prompt,
            Job::Edit(job) | Job::Filter(job) | Job::Adjust(job) => {
                if job.image_url.trim().is_empty() {
                    return Err("image_url is empty".to_string());
                }
                &job.prompt
            }
            Job::Compose(job) => {
                if job.image_urls.is_empty() {
                    return Err("image_urls is empty".to_string());
                }
                if job.image_urls.len() > MAX_COMPOSE_IMAGES {
                    return Err(format!(
                        "at most {} images can be composed, got {}",
                        MAX_COMPOSE_IMAGES,
                        job.image_urls.len()
                    ));
                }
                &job.prompt
            }
        };

        if prompt.trim().is_empty() {
            return Err("prompt is empty".to_string());
        }
        Ok(())
    }
}
