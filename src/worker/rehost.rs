//! Making source images reachable by the external image API
//!
//! Images uploaded to this service usually live on local disk or behind a
//! host name only the backend network can resolve. Before an edit call such
//! URLs are re-uploaded to a public temporary host. Every step is best
//! effort: when nothing works the original URL is passed on unchanged.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RehostConfig;
use crate::error::{AppError, Result};

const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "backend"];

/// Turns a possibly private image reference into a public URL
#[async_trait]
pub trait PublicUrlResolver: Send + Sync {
    /// Never fails; falls back to `image_url` itself
    async fn resolve_public_url(&self, image_url: &str, image_path: Option<&str>) -> String;
}

/// Resolver that leaves every URL untouched
pub struct PassthroughResolver;

#[async_trait]
impl PublicUrlResolver for PassthroughResolver {
    async fn resolve_public_url(&self, image_url: &str, _image_path: Option<&str>) -> String {
        image_url.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct TmpfilesResponse {
    #[serde(default)]
    data: Option<TmpfilesData>,
}

#[derive(Debug, Deserialize)]
struct TmpfilesData {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileIoResponse {
    #[serde(default)]
    link: Option<String>,
}

/// Re-uploads private images to tmpfiles.org, then file.io
pub struct Rehoster {
    client: Client,
    config: RehostConfig,
}

impl Rehoster {
    pub fn new(config: &RehostConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Whether the external API would be unable to fetch `image_url` itself
    pub fn needs_rehost(&self, image_url: &str) -> bool {
        if self.config.storage_backend == "local" || image_url.starts_with("/media/") {
            return true;
        }

        match Url::parse(image_url) {
            Ok(url) => !matches!(url.scheme(), "http" | "https") || is_local_host(&url),
            Err(_) => true,
        }
    }

    /// Address the backend itself serves `image_url` at
    fn internal_url(&self, image_url: &str) -> String {
        let path = match Url::parse(image_url) {
            Ok(url) if !is_local_host(&url) => return image_url.to_string(),
            Ok(url) => url.path().to_string(),
            Err(_) => image_url.to_string(),
        };

        let path = path.trim_start_matches('/');
        format!("{}/{}", self.config.internal_base_url.trim_end_matches('/'), path)
    }

    async fn read_local(path: &str) -> Option<Vec<u8>> {
        let path = Path::new(path);
        if !path.exists() {
            return None;
        }
        match tokio::fs::read(path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(path = ?path, error = %e, "Could not read source image");
                None
            }
        }
    }

    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(bytes) => Some(bytes.to_vec()),
                Err(e) => {
                    warn!(url = %url, error = %e, "Could not read downloaded image");
                    None
                }
            },
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Could not download image");
                None
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Could not download image");
                None
            }
        }
    }

    fn image_form(bytes: &[u8]) -> Option<Form> {
        let part = Part::bytes(bytes.to_vec())
            .file_name("image.png")
            .mime_str("image/png")
            .ok()?;
        Some(Form::new().part("file", part))
    }

    async fn upload_tmpfiles(&self, bytes: &[u8]) -> Option<String> {
        let form = Self::image_form(bytes)?;
        let response = match self
            .client
            .post(&self.config.tmpfiles_url)
            .multipart(form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "tmpfiles upload failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "tmpfiles upload failed");
            return None;
        }

        let link = response
            .json::<TmpfilesResponse>()
            .await
            .ok()
            .and_then(|body| body.data)
            .and_then(|data| data.url);
        let Some(link) = link else {
            warn!("tmpfiles response without link");
            return None;
        };

        let direct = tmpfiles_direct_link(&link);
        info!(url = %direct, "Rehosted image to tmpfiles");
        Some(direct)
    }

    async fn upload_fileio(&self, bytes: &[u8]) -> Option<String> {
        let form = Self::image_form(bytes)?;
        let response = match self
            .client
            .post(&self.config.fileio_url)
            .multipart(form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "file.io upload failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "file.io upload failed");
            return None;
        }

        match response.json::<FileIoResponse>().await.ok().and_then(|body| body.link) {
            Some(link) => {
                info!(url = %link, "Rehosted image to file.io");
                Some(link)
            }
            None => {
                warn!("file.io response without link");
                None
            }
        }
    }
}

fn is_local_host(url: &Url) -> bool {
    let host = url.host_str().unwrap_or_default();
    LOCAL_HOSTS.contains(&host) || host.ends_with(".local")
}

/// tmpfiles hands out a viewer page; `/dl/<id>/<name>` serves the file
fn tmpfiles_direct_link(link: &str) -> String {
    let Ok(mut url) = Url::parse(link) else {
        return link.to_string();
    };

    let parts: Vec<String> = url
        .path()
        .trim_matches('/')
        .split('/')
        .map(String::from)
        .collect();
    if parts.len() < 2 {
        return link.to_string();
    }

    let id = &parts[parts.len() - 2];
    let name = &parts[parts.len() - 1];
    url.set_path(&format!("/dl/{}/{}", id, name));
    url.to_string()
}

#[async_trait]
impl PublicUrlResolver for Rehoster {
    async fn resolve_public_url(&self, image_url: &str, image_path: Option<&str>) -> String {
        if !self.needs_rehost(image_url) {
            return image_url.to_string();
        }

        let mut bytes = match image_path {
            Some(path) => Self::read_local(path).await,
            None => None,
        };

        if bytes.is_none() {
            let internal = self.internal_url(image_url);
            debug!(url = %internal, "Fetching source image from backend");
            bytes = self.fetch(&internal).await;
        }

        let Some(bytes) = bytes else {
            return image_url.to_string();
        };

        if let Some(url) = self.upload_tmpfiles(&bytes).await {
            return url;
        }
        if let Some(url) = self.upload_fileio(&bytes).await {
            return url;
        }

        warn!(url = %image_url, "Every rehost target failed, passing the original URL");
        image_url.to_string()
    }
}
