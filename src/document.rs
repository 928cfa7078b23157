//! The rendered document and the root it is attached to.
//!
//! `DocumentSubtree` is the UI-owned snapshot of rendered markup. The export
//! pipeline only ever reads or deep-clones it. `DocumentRoot` stands in for the
//! document body: temporary staging hosts are attached to it for the duration
//! of a capture and removed afterwards.

use crate::{Error, Result, CANONICAL_WIDTH};
use scraper::Html;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Rendered markup owned by the UI layer.
#[derive(Debug, Clone)]
pub struct DocumentSubtree {
    markup: Arc<str>,
    canonical_width: u32,
}

impl DocumentSubtree {
    /// Wrap a markup string produced by the generation service. The string is
    /// kept verbatim, inline styles included.
    pub fn new(markup: impl Into<String>) -> Self {
        Self::with_width(markup, CANONICAL_WIDTH)
    }

    pub fn with_width(markup: impl Into<String>, canonical_width: u32) -> Self {
        let markup: String = markup.into();
        Self {
            markup: Arc::from(markup),
            canonical_width,
        }
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn canonical_width(&self) -> u32 {
        self.canonical_width
    }

    /// The same markup laid out at `width`.
    pub fn at_width(mut self, width: u32) -> Self {
        self.canonical_width = width;
        self
    }

    /// Structurally identical copy that shares nothing with `self`.
    pub fn deep_clone(&self) -> Self {
        Self {
            markup: Arc::from(self.markup.as_ref()),
            canonical_width: self.canonical_width,
        }
    }

    /// Parse the markup. Fragments are wrapped in a synthetic `<body>`.
    pub fn parse(&self) -> Html {
        Html::parse_document(&self.markup)
    }

    /// SHA-256 of the markup, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.markup.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether two handles point at the same allocation (i.e. one is not a deep clone).
    pub fn shares_storage_with(&self, other: &DocumentSubtree) -> bool {
        Arc::ptr_eq(&self.markup, &other.markup)
    }
}

/// Identifier of a host attached to a `DocumentRoot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(u64);

/// Presentation of an attached host, mirroring the inline style the capture
/// container carries.
#[derive(Debug, Clone, PartialEq)]
pub struct HostStyle {
    pub position: &'static str,
    pub top: i32,
    pub left: i32,
    pub width: u32,
    pub z_index: i32,
    pub overflow: &'static str,
    pub transform: Option<String>,
}

impl HostStyle {
    /// Fixed, fully offscreen, canonical width, untransformed.
    pub fn offscreen(width: u32) -> Self {
        Self {
            position: "fixed",
            top: -10000,
            left: -10000,
            width,
            z_index: -1000,
            overflow: "visible",
            transform: None,
        }
    }

    /// Render as a CSS declaration block.
    pub fn to_css(&self) -> String {
        let mut css = format!(
            "position: {}; top: {}px; left: {}px; width: {}px; height: auto; z-index: {}; overflow: {};",
            self.position, self.top, self.left, self.width, self.z_index, self.overflow
        );
        if let Some(t) = &self.transform {
            css.push_str(&format!(" transform: {};", t));
        }
        css
    }

    /// True when no part of a box of `height` px at this position intersects a
    /// viewport anchored at the origin.
    pub fn is_outside_viewport(&self, height: u32) -> bool {
        let right = self.left as i64 + self.width as i64;
        let bottom = self.top as i64 + height as i64;
        right <= 0 || bottom <= 0
    }
}

#[derive(Debug)]
struct AttachedHost {
    style: HostStyle,
    content: DocumentSubtree,
}

#[derive(Debug, Default)]
struct RootInner {
    next_id: u64,
    hosts: BTreeMap<HostId, AttachedHost>,
}

/// The document body staging hosts are attached to.
///
/// Cloning the handle shares the same root.
#[derive(Debug, Clone, Default)]
pub struct DocumentRoot {
    inner: Arc<Mutex<RootInner>>,
}

impl DocumentRoot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RootInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a host holding `content`. Only one host may be attached at a time.
    pub fn attach(&self, style: HostStyle, content: DocumentSubtree) -> Result<HostId> {
        let mut inner = self.lock();
        if !inner.hosts.is_empty() {
            return Err(Error::StagingError(format!(
                "{} staging host(s) already attached",
                inner.hosts.len()
            )));
        }
        inner.next_id += 1;
        let id = HostId(inner.next_id);
        inner.hosts.insert(id, AttachedHost { style, content });
        Ok(id)
    }

    /// Detach a host. Returns false when the host was not attached.
    pub fn detach(&self, id: HostId) -> bool {
        self.lock().hosts.remove(&id).is_some()
    }

    pub fn attached_hosts(&self) -> usize {
        self.lock().hosts.len()
    }

    pub fn host_style(&self, id: HostId) -> Option<HostStyle> {
        self.lock().hosts.get(&id).map(|h| h.style.clone())
    }

    /// Snapshot of the content mounted in a host.
    pub fn host_content(&self, id: HostId) -> Option<DocumentSubtree> {
        self.lock().hosts.get(&id).map(|h| h.content.clone())
    }

    /// Fails with `ResourceLeak` if anything is still attached.
    pub fn ensure_clean(&self) -> Result<()> {
        match self.attached_hosts() {
            0 => Ok(()),
            n => Err(Error::ResourceLeak(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_clone_is_identical_but_independent() {
        let doc = DocumentSubtree::new("<div><h1>Jane</h1></div>");
        let copy = doc.deep_clone();
        assert_eq!(doc.markup(), copy.markup());
        assert_eq!(doc.fingerprint(), copy.fingerprint());
        assert!(!doc.shares_storage_with(&copy));
        assert!(doc.shares_storage_with(&doc.clone()));
    }

    #[test]
    fn at_width_keeps_the_markup() {
        let doc = DocumentSubtree::new("<p>x</p>").deep_clone().at_width(600);
        assert_eq!(doc.canonical_width(), 600);
        assert_eq!(doc.markup(), "<p>x</p>");
    }

    #[test]
    fn root_refuses_second_host() {
        let root = DocumentRoot::new();
        let doc = DocumentSubtree::new("<p>x</p>");
        let id = root.attach(HostStyle::offscreen(850), doc.clone()).unwrap();
        assert!(root.attach(HostStyle::offscreen(850), doc).is_err());
        assert!(root.detach(id));
        assert!(!root.detach(id));
        assert!(root.ensure_clean().is_ok());
    }

    #[test]
    fn offscreen_style_is_outside_viewport() {
        let style = HostStyle::offscreen(850);
        assert!(style.is_outside_viewport(5000));
        assert!(style.to_css().contains("width: 850px"));
        assert!(!style.to_css().contains("transform"));
    }
}
