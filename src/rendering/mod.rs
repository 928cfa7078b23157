//! Capture renderer: inline styles, block layout, paint list and rasterizer.

pub mod layout;
pub mod paint;
pub mod raster;
pub mod resources;
pub mod style;

/// A capture encoded as PNG, used for previews.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub png_data: Vec<u8>,
}
