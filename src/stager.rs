//! Offscreen staging of a document clone.
//!
//! The clone is mounted into a host pinned far outside the viewport at the
//! canonical width, independent of how the preview is currently scaled. The
//! host is a guard: dropping it removes it from the root, whatever path the
//! export took.

use crate::document::{DocumentRoot, DocumentSubtree, HostId, HostStyle};
use crate::export::CancelHandle;
use crate::rendering::resources::{image_sources, ResourceLoader, ResourceSet};
use crate::{Error, ExportConfig, Result};
use serde::Deserialize;
use std::time::Duration;

/// How the staged clone becomes ready for capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlePolicy {
    /// Wait a fixed delay and let the rasterizer load images itself
    FixedDelay,
    /// Resolve every image load, bounded per image and as a whole
    #[default]
    AwaitResources,
}

/// A settled clone, ready for the rasterizer.
#[derive(Debug, Clone)]
pub struct StagedDocument {
    pub document: DocumentSubtree,
    pub width: u32,
    /// Preloaded images; `None` when the rasterizer should load them
    pub resources: Option<ResourceSet>,
}

#[derive(Debug, Clone)]
pub struct OffscreenStager {
    width: u32,
    settle: SettlePolicy,
    settle_delay: Duration,
    settle_timeout: Duration,
    loader: ResourceLoader,
    enable_images: bool,
}

impl OffscreenStager {
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            width: config.canonical_width,
            settle: config.settle,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            settle_timeout: Duration::from_millis(config.settle_timeout_ms),
            loader: ResourceLoader::from_config(config),
            enable_images: config.enable_images,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Deep-clone `source` and attach it to `root` in an offscreen host.
    pub fn stage(&self, root: &DocumentRoot, source: &DocumentSubtree) -> Result<StagingHost> {
        if self.width == 0 {
            return Err(Error::StagingError("host width must be positive".into()));
        }
        // The UI-owned subtree is never mounted or mutated
        let clone = source.deep_clone().at_width(self.width);
        let style = HostStyle::offscreen(self.width);
        let css = style.to_css();
        let id = root.attach(style, clone.clone())?;
        log::debug!("staged clone {} in host {:?} [{}]", &clone.fingerprint()[..12], id, css);
        Ok(StagingHost {
            root: root.clone(),
            id,
            document: clone,
            stager: self.clone(),
        })
    }
}

/// An attached offscreen host. Detached on drop.
#[derive(Debug)]
pub struct StagingHost {
    root: DocumentRoot,
    id: HostId,
    document: DocumentSubtree,
    stager: OffscreenStager,
}

impl StagingHost {
    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn document(&self) -> &DocumentSubtree {
        &self.document
    }

    pub fn style(&self) -> Option<HostStyle> {
        self.root.host_style(self.id)
    }

    /// Wait until the clone is ready to capture. Returns `Error::Cancelled`
    /// if `cancel` fires first.
    pub async fn settle(&self, cancel: &CancelHandle) -> Result<StagedDocument> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = self.settle_inner() => res,
        }
    }

    async fn settle_inner(&self) -> Result<StagedDocument> {
        let s = &self.stager;
        // Capture what is actually mounted
        let document = self
            .root
            .host_content(self.id)
            .ok_or_else(|| Error::StagingError(format!("host {:?} is no longer attached", self.id)))?;
        let resources = match (s.settle, s.enable_images) {
            (_, false) => Some(ResourceSet::default()),
            (SettlePolicy::FixedDelay, true) => {
                tokio::time::sleep(s.settle_delay).await;
                None
            }
            (SettlePolicy::AwaitResources, true) => {
                let sources = image_sources(&document);
                let count = sources.len();
                // Each image is bounded by the loader; this caps the set as a whole
                let set = tokio::time::timeout(s.settle_timeout, s.loader.load_all(sources))
                    .await
                    .map_err(|_| Error::Timeout(s.settle_timeout.as_millis() as u64))?;
                log::debug!("settled host {:?}: {}/{} images loaded", self.id, set.loaded(), count);
                Some(set)
            }
        };
        Ok(StagedDocument {
            document,
            width: s.width,
            resources,
        })
    }
}

impl Drop for StagingHost {
    fn drop(&mut self) {
        if self.root.detach(self.id) {
            log::debug!("removed staging host {:?}", self.id);
        }
    }
}
