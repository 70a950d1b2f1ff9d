//! Shared doubles for functional tests

use async_trait::async_trait;
use gen_dispatch::backend::traits::{ImageBackend, ImageOptions};
use gen_dispatch::worker::PublicUrlResolver;
use gen_dispatch::{AppError, Result};
use parking_lot::Mutex;

/// One call made against [`StubImages`]
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCall {
    pub prompt: String,
    pub image_urls: Vec<String>,
    pub options: ImageOptions,
}

/// Image backend answering with a canned result
pub struct StubImages {
    outcome: Box<dyn Fn() -> Result<String> + Send + Sync>,
    pub calls: Mutex<Vec<ImageCall>>,
}

impl StubImages {
    pub fn returning(url: &'static str) -> Self {
        Self {
            outcome: Box::new(move || -> Result<String> { Ok(url.to_string()) }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: u16, message: &'static str) -> Self {
        Self {
            outcome: Box::new(move || -> Result<String> {
                Err(AppError::Upstream {
                    status,
                    message: message.to_string(),
                })
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn panicking() -> Self {
        Self {
            outcome: Box::new(|| -> Result<String> { panic!("image client exploded") }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ImageBackend for StubImages {
    fn name(&self) -> &str {
        "stub"
    }

    async fn text_to_image(&self, prompt: &str, options: &ImageOptions) -> Result<String> {
        self.calls.lock().push(ImageCall {
            prompt: prompt.to_string(),
            image_urls: vec![],
            options: options.clone(),
        });
        (self.outcome)()
    }

    async fn edit_image(
        &self,
        prompt: &str,
        image_urls: &[String],
        options: &ImageOptions,
    ) -> Result<String> {
        self.calls.lock().push(ImageCall {
            prompt: prompt.to_string(),
            image_urls: image_urls.to_vec(),
            options: options.clone(),
        });
        (self.outcome)()
    }
}

/// Resolver that prefixes URLs and records the disk paths it was given
#[derive(Default)]
pub struct RecordingResolver {
    pub seen: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl PublicUrlResolver for RecordingResolver {
    async fn resolve_public_url(&self, image_url: &str, image_path: Option<&str>) -> String {
        self.seen
            .lock()
            .push((image_url.to_string(), image_path.map(String::from)));
        format!("https://public.example/{}", image_url.trim_start_matches('/'))
    }
}

/// Resolver that blows up, standing in for an unexpected fault
pub struct FailingResolver;

#[async_trait]
impl PublicUrlResolver for FailingResolver {
    async fn resolve_public_url(&self, _image_url: &str, _image_path: Option<&str>) -> String {
        panic!("rehost failed")
    }
}
