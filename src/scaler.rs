//! Layout scaler: fits the fixed-width preview into an arbitrary container.
//!
//! The scale only affects how the preview is displayed. Export always
//! captures at the full canonical width.

use crate::viewport::{ViewportContext, ViewportObserver};
use crate::{CANONICAL_WIDTH, PREVIEW_MARGIN};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Scale factor for a container of `container_width` px.
///
/// `min(1, max(0, (container_width - margin) / canonical_width))`. Never NaN,
/// never negative, never above 1. Non-finite widths and a zero canonical width
/// yield 0.
pub fn scale_factor(container_width: f32, margin: f32, canonical_width: f32) -> f32 {
    if !container_width.is_finite() || !margin.is_finite() || canonical_width <= 0.0 || !canonical_width.is_finite() {
        return 0.0;
    }
    let raw = (container_width - margin) / canonical_width;
    raw.clamp(0.0, 1.0)
}

/// Visual transform applied to the preview element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleTransform {
    pub factor: f32,
    pub canonical_width: u32,
}

impl ScaleTransform {
    /// CSS `transform` value.
    pub fn css(&self) -> String {
        format!("scale({})", self.factor)
    }

    pub fn origin(&self) -> &'static str {
        "top center"
    }

    /// Width the preview occupies on screen.
    pub fn displayed_width(&self) -> f32 {
        self.canonical_width as f32 * self.factor
    }

    /// Height the preview occupies on screen for a document of `rendered_height` px.
    pub fn displayed_height(&self, rendered_height: u32) -> f32 {
        rendered_height as f32 * self.factor
    }
}

#[derive(Debug, Clone)]
pub struct LayoutScaler {
    canonical_width: u32,
    margin: u32,
    factor: f32,
}

impl Default for LayoutScaler {
    fn default() -> Self {
        Self::new(CANONICAL_WIDTH, PREVIEW_MARGIN)
    }
}

impl LayoutScaler {
    pub fn new(canonical_width: u32, margin: u32) -> Self {
        Self {
            canonical_width,
            margin,
            factor: 1.0,
        }
    }

    /// Initial evaluation when the preview is mounted.
    pub fn mount(&mut self, ctx: ViewportContext) -> ScaleTransform {
        self.on_resize(ctx.container_width)
    }

    pub fn on_resize(&mut self, container_width: f32) -> ScaleTransform {
        self.factor = scale_factor(container_width, self.margin as f32, self.canonical_width as f32);
        log::debug!("preview scale for container {}px -> {}", container_width, self.factor);
        self.transform()
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn transform(&self) -> ScaleTransform {
        ScaleTransform {
            factor: self.factor,
            canonical_width: self.canonical_width,
        }
    }

    /// Evaluate once on mount and then on every resize published by `observer`.
    ///
    /// The returned receiver always holds the transform for the latest
    /// viewport. The task ends when the observer is dropped.
    pub fn track(mut self, observer: &ViewportObserver) -> (watch::Receiver<ScaleTransform>, JoinHandle<()>) {
        let mut rx = observer.subscribe();
        let initial = self.mount(*rx.borrow_and_update());
        let (tx, out) = watch::channel(initial);
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let width = rx.borrow_and_update().container_width;
                let transform = self.on_resize(width);
                if tx.send(transform).is_err() {
                    break;
                }
            }
        });
        (out, handle)
    }
}
