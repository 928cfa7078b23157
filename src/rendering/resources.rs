//! Image loading for the staged clone.
//!
//! Sources may be `data:` URIs, `http(s)` URLs (with the `remote-images`
//! feature) or filesystem paths resolved against a base directory. Remote
//! loads are anonymous, like a CORS-permissive `<img crossorigin>`.

use crate::{Error, ExportConfig, Result};
use base64::Engine as _;
use image::RgbaImage;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What a failed image load does to the capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagePolicy {
    /// Leave the image box empty and carry on
    #[default]
    Skip,
    /// Fail the whole capture
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceFailure {
    pub src: String,
    pub reason: String,
}

/// Decoded images of a document, keyed by their `src` attribute.
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    images: HashMap<String, Arc<RgbaImage>>,
    failures: Vec<ResourceFailure>,
}

impl ResourceSet {
    pub fn image(&self, src: &str) -> Option<&Arc<RgbaImage>> {
        self.images.get(src)
    }

    pub fn dimensions(&self, src: &str) -> Option<(u32, u32)> {
        self.images.get(src).map(|img| img.dimensions())
    }

    pub fn failures(&self) -> &[ResourceFailure] {
        &self.failures
    }

    pub fn loaded(&self) -> usize {
        self.images.len()
    }

    pub fn insert(&mut self, src: impl Into<String>, image: RgbaImage) {
        self.images.insert(src.into(), Arc::new(image));
    }

    pub fn record_failure(&mut self, src: impl Into<String>, reason: impl Into<String>) {
        self.failures.push(ResourceFailure { src: src.into(), reason: reason.into() });
    }

    /// Apply `policy` to recorded failures.
    pub fn check(&self, policy: ImagePolicy) -> Result<()> {
        match (policy, self.failures.first()) {
            (ImagePolicy::Abort, Some(f)) => Err(Error::CaptureFailed(format!(
                "image {} failed to load: {}",
                f.src, f.reason
            ))),
            (ImagePolicy::Skip, _) => {
                for f in &self.failures {
                    log::warn!("skipping image {}: {}", f.src, f.reason);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Distinct `<img src>` values of `doc`, in document order.
pub fn image_sources(doc: &crate::DocumentSubtree) -> Vec<String> {
    let html = doc.parse();
    let mut seen = std::collections::HashSet::new();
    html.root_element()
        .descendants()
        .filter_map(scraper::ElementRef::wrap)
        .filter(|e| e.value().name() == "img")
        .filter_map(|e| e.value().attr("src"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

fn parse_data_uri(uri: &str) -> Option<Vec<u8>> {
    let rest = uri.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    if header.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        base64::engine::general_purpose::STANDARD.decode(data.trim()).ok()
    } else {
        Some(data.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct ResourceLoader {
    base_dir: Option<PathBuf>,
    user_agent: String,
    timeout: Duration,
}

impl ResourceLoader {
    pub fn new(base_dir: Option<PathBuf>, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_dir,
            user_agent: user_agent.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(
            config.base_dir.clone(),
            config.user_agent.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch the raw bytes behind `src`. Blocking.
    pub fn load_bytes(&self, src: &str) -> Result<Vec<u8>> {
        if src.starts_with("data:") {
            return parse_data_uri(src).ok_or_else(|| Error::ResourceError {
                url: truncate(src),
                reason: "malformed data URI".into(),
            });
        }
        if src.starts_with("http://") || src.starts_with("https://") {
            return self.fetch_remote(src);
        }
        let path = match url::Url::parse(src) {
            Ok(u) if u.scheme() == "file" => u.to_file_path().map_err(|_| Error::ResourceError {
                url: src.to_string(),
                reason: "not a local file URL".into(),
            })?,
            Ok(u) => {
                return Err(Error::ResourceError {
                    url: src.to_string(),
                    reason: format!("unsupported scheme {}", u.scheme()),
                })
            }
            Err(_) => self.resolve_path(src),
        };
        std::fs::read(&path).map_err(|e| Error::ResourceError {
            url: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn resolve_path(&self, src: &str) -> PathBuf {
        let p = Path::new(src);
        match &self.base_dir {
            Some(base) if p.is_relative() => base.join(p),
            _ => p.to_path_buf(),
        }
    }

    #[cfg(feature = "remote-images")]
    fn fetch_remote(&self, src: &str) -> Result<Vec<u8>> {
        // Built per call: a blocking client must not be created or dropped on an async thread
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| Error::ResourceError { url: src.to_string(), reason: e.to_string() })?;
        let resp = client
            .get(src)
            .send()
            .map_err(|e| Error::ResourceError { url: src.to_string(), reason: e.to_string() })?;
        if !resp.status().is_success() {
            return Err(Error::ResourceError {
                url: src.to_string(),
                reason: format!("HTTP {}", resp.status()),
            });
        }
        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| Error::ResourceError { url: src.to_string(), reason: e.to_string() })
    }

    #[cfg(not(feature = "remote-images"))]
    fn fetch_remote(&self, src: &str) -> Result<Vec<u8>> {
        Err(Error::ResourceError {
            url: src.to_string(),
            reason: "remote images are disabled in this build".into(),
        })
    }

    /// Load and decode one image. Blocking.
    pub fn load_image(&self, src: &str) -> Result<RgbaImage> {
        let bytes = self.load_bytes(src)?;
        image::load_from_memory(&bytes)
            .map(|img| img.to_rgba8())
            .map_err(|e| Error::ResourceError { url: truncate(src), reason: e.to_string() })
    }

    /// Load every source on the calling thread.
    pub fn load_all_blocking(&self, sources: &[String]) -> ResourceSet {
        let mut set = ResourceSet::default();
        for src in sources {
            match self.load_image(src) {
                Ok(img) => set.insert(src.clone(), img),
                Err(e) => set.record_failure(src.clone(), e.to_string()),
            }
        }
        set
    }

    /// Load every source concurrently on the blocking pool and wait for all of them.
    ///
    /// Each load is bounded by the loader timeout on its own. A source that
    /// overruns is recorded as a failure and the set completes without it; the
    /// blocking task is left to finish in the background.
    pub async fn load_all(&self, sources: Vec<String>) -> ResourceSet {
        let timeout = self.timeout;
        let tasks = sources.into_iter().map(|src| {
            let loader = self.clone();
            async move {
                let key = src.clone();
                let task = tokio::task::spawn_blocking(move || loader.load_image(&src));
                (key, tokio::time::timeout(timeout, task).await)
            }
        });
        let mut set = ResourceSet::default();
        for (src, res) in futures::future::join_all(tasks).await {
            match res {
                Ok(Ok(Ok(img))) => set.insert(src, img),
                Ok(Ok(Err(e))) => set.record_failure(src, e.to_string()),
                Ok(Err(join)) => set.record_failure(src, format!("loader task failed: {}", join)),
                Err(_) => set.record_failure(src, format!("timed out after {}ms", timeout.as_millis())),
            }
        }
        set
    }
}

fn truncate(src: &str) -> String {
    if src.len() <= 64 {
        return src.to_string();
    }
    let mut end = 64;
    while !src.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &src[..end])
}
