//! Rasterizer: paints a staged document into a single RGBA bitmap.
//!
//! Output is `width * density` by `measured_height * density` pixels on an
//! opaque background. A document that measures zero pixels tall is a capture
//! failure, never an empty image.

use crate::document::DocumentSubtree;
use crate::rendering::layout::{advance_for, layout_document};
use crate::rendering::paint::{build_display_list, PaintCommand};
use crate::rendering::resources::{image_sources, ImagePolicy, ResourceLoader, ResourceSet};
use crate::rendering::style::Rgba;
use crate::rendering::Screenshot;
use crate::stager::StagedDocument;
use crate::{Error, ExportConfig, Result};
use image::{imageops, ImageEncoder, RgbaImage};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Largest pixel buffer a single capture may allocate.
const MAX_RASTER_BYTES: u64 = 1 << 30;

#[derive(Debug, Clone)]
pub struct RasterOptions {
    /// Pixel density multiplier, at least 1
    pub density: u32,
    /// Opaque fill painted before the document
    pub background: Rgba,
    pub image_policy: ImagePolicy,
    pub enable_images: bool,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            density: 2,
            background: Rgba::WHITE,
            image_policy: ImagePolicy::Skip,
            enable_images: true,
        }
    }
}

impl RasterOptions {
    pub fn from_config(config: &ExportConfig) -> Result<Self> {
        Ok(Self {
            density: config.capture_density,
            background: config.background_color()?,
            image_policy: config.image_policy,
            enable_images: config.enable_images,
        })
    }
}

/// A captured bitmap, RGBA8, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    density: u32,
    pixels: Vec<u8>,
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("density", &self.density)
            .finish_non_exhaustive()
    }
}

impl RasterImage {
    pub fn from_rgba(width: u32, height: u32, density: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as u64 * height as u64 * 4;
        if pixels.len() as u64 != expected {
            return Err(Error::RenderError(format!(
                "pixel buffer is {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self { width, height, density: density.max(1), pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn density(&self) -> u32 {
        self.density
    }

    pub fn logical_width(&self) -> u32 {
        self.width / self.density
    }

    pub fn logical_height(&self) -> u32 {
        self.height / self.density
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize * self.width as usize) + x as usize) * 4;
        let p = self.pixels.get(i..i + 4)?;
        Some([p[0], p[1], p[2], p[3]])
    }

    /// Packed RGB, alpha dropped. The canvas is always opaque.
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.pixels.len() / 4 * 3);
        for px in self.pixels.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }
        rgb
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        image::codecs::png::PngEncoder::new(&mut out).write_image(
            &self.pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
        )?;
        Ok(out)
    }

    pub fn screenshot(&self) -> Result<Screenshot> {
        Ok(Screenshot {
            width: self.width,
            height: self.height,
            png_data: self.to_png()?,
        })
    }

    /// SHA-256 of the pixel content, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_be_bytes());
        hasher.update(self.height.to_be_bytes());
        hasher.update(&self.pixels);
        hex::encode(hasher.finalize())
    }
}

struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(width: u32, height: u32, background: Rgba) -> Self {
        let bg = background.opaque().to_array();
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&bg);
        }
        Self { width, height, pixels }
    }

    fn blend_at(&mut self, x: u32, y: u32, src: [u8; 4]) {
        let i = ((y as usize * self.width as usize) + x as usize) * 4;
        let a = src[3] as u32;
        if a == 0 {
            return;
        }
        for c in 0..3 {
            let dst = self.pixels[i + c] as u32;
            self.pixels[i + c] = ((src[c] as u32 * a + dst * (255 - a)) / 255) as u8;
        }
        self.pixels[i + 3] = 255;
    }

    fn fill_rect(&mut self, x: i64, y: i64, w: i64, h: i64, rgba: [u8; 4]) {
        let x0 = x.clamp(0, self.width as i64) as u32;
        let y0 = y.clamp(0, self.height as i64) as u32;
        let x1 = (x + w).clamp(0, self.width as i64) as u32;
        let y1 = (y + h).clamp(0, self.height as i64) as u32;
        for py in y0..y1 {
            for px in x0..x1 {
                self.blend_at(px, py, rgba);
            }
        }
    }

    fn draw_image(&mut self, x: i64, y: i64, img: &RgbaImage) {
        for (ix, iy, p) in img.enumerate_pixels() {
            let px = x + ix as i64;
            let py = y + iy as i64;
            if px < 0 || py < 0 || px >= self.width as i64 || py >= self.height as i64 {
                continue;
            }
            self.blend_at(px as u32, py as u32, p.0);
        }
    }
}

pub struct Rasterizer {
    options: RasterOptions,
    loader: ResourceLoader,
}

impl Rasterizer {
    pub fn new(options: RasterOptions, loader: ResourceLoader) -> Self {
        Self { options, loader }
    }

    pub fn from_config(config: &ExportConfig) -> Result<Self> {
        Ok(Self::new(RasterOptions::from_config(config)?, ResourceLoader::from_config(config)))
    }

    pub fn options(&self) -> &RasterOptions {
        &self.options
    }

    /// Capture a staged clone. Images the stager did not preload are loaded here.
    pub fn rasterize(&self, staged: &StagedDocument) -> Result<RasterImage> {
        let resources: Cow<'_, ResourceSet> = match (&staged.resources, self.options.enable_images) {
            (Some(r), _) => Cow::Borrowed(r),
            (None, true) => Cow::Owned(self.loader.load_all_blocking(&image_sources(&staged.document))),
            (None, false) => Cow::Owned(ResourceSet::default()),
        };
        self.rasterize_document(&staged.document, staged.width, &resources)
    }

    pub fn rasterize_document(&self, doc: &DocumentSubtree, width: u32, resources: &ResourceSet) -> Result<RasterImage> {
        let density = self.options.density;
        if density == 0 {
            return Err(Error::ConfigError("capture density must be at least 1".into()));
        }
        if width == 0 {
            return Err(Error::CaptureFailed("capture width is zero".into()));
        }
        resources.check(self.options.image_policy)?;

        let layout = layout_document(&doc.parse(), width, resources);
        if layout.height == 0 {
            return Err(Error::CaptureFailed("staged document measured 0px tall".into()));
        }

        let px_w = width as u64 * density as u64;
        let px_h = layout.height as u64 * density as u64;
        let bytes = px_w.saturating_mul(px_h).saturating_mul(4);
        if bytes > MAX_RASTER_BYTES || px_w > u32::MAX as u64 || px_h > u32::MAX as u64 {
            return Err(Error::CaptureFailed(format!("a {}x{} capture is too large", px_w, px_h)));
        }
        log::debug!(
            "rasterizing {}x{} logical px at {}x -> {}x{}",
            width,
            layout.height,
            density,
            px_w,
            px_h
        );

        let mut canvas = Canvas::new(px_w as u32, px_h as u32, self.options.background);
        let d = density as i64;
        for cmd in build_display_list(&layout) {
            match cmd {
                PaintCommand::SolidRect { x, y, width, height, rgba } => {
                    canvas.fill_rect(x as i64 * d, y as i64 * d, width as i64 * d, height as i64 * d, [rgba.0, rgba.1, rgba.2, rgba.3]);
                }
                PaintCommand::Text { x, y, lines, font_px, line_height, rgba } => {
                    let advance = advance_for(font_px) as i64 * d;
                    let glyph_w = (advance * 3 / 4).max(1);
                    let glyph_h = (font_px as i64 * d * 7 / 10).max(1);
                    let line_px = line_height as i64 * d;
                    let x_off = (advance - glyph_w) / 2;
                    let y_off = (line_px - glyph_h) / 2;
                    let color = [rgba.0, rgba.1, rgba.2, rgba.3];
                    for (row, line) in lines.iter().enumerate() {
                        let top = y as i64 * d + row as i64 * line_px + y_off;
                        for (col, ch) in line.chars().enumerate() {
                            if ch.is_whitespace() {
                                continue;
                            }
                            let left = x as i64 * d + col as i64 * advance + x_off;
                            canvas.fill_rect(left, top, glyph_w, glyph_h, color);
                        }
                    }
                }
                PaintCommand::Image { x, y, width, height, src } => {
                    let Some(img) = resources.image(&src) else {
                        continue;
                    };
                    let tw = width.saturating_mul(density);
                    let th = height.saturating_mul(density);
                    if img.dimensions() == (tw, th) {
                        canvas.draw_image(x as i64 * d, y as i64 * d, img);
                    } else {
                        let scaled = imageops::resize(&**img, tw, th, imageops::FilterType::Triangle);
                        canvas.draw_image(x as i64 * d, y as i64 * d, &scaled);
                    }
                }
            }
        }

        RasterImage::from_rgba(canvas.width, canvas.height, density, canvas.pixels)
    }
}
