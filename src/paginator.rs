//! Windowed pagination of a tall raster onto fixed-size PDF pages.
//!
//! The raster is scaled to the page width and embedded once. Page `k` draws
//! the whole image shifted up by `k` page heights and lets the page box clip
//! it, so the pages together show every row exactly once. Content crossing a
//! page boundary is cut, not reflowed.

use crate::rendering::raster::RasterImage;
use crate::{Error, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Write;

/// PostScript points per millimetre.
pub const MM_TO_PT: f64 = 72.0 / 25.4;

/// Remaining heights at or below this many mm do not start a new page.
const HEIGHT_EPSILON_MM: f64 = 1e-6;

const PRODUCER: &str = "rfexport";
const TITLE: &str = "Executive Resume";

/// Physical page format of the output.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    #[default]
    A4,
    Letter,
    Custom { width_mm: f64, height_mm: f64 },
}

impl PageSize {
    pub fn width_mm(&self) -> f64 {
        match self {
            PageSize::A4 => 210.0,
            PageSize::Letter => 215.9,
            PageSize::Custom { width_mm, .. } => *width_mm,
        }
    }

    pub fn height_mm(&self) -> f64 {
        match self {
            PageSize::A4 => 297.0,
            PageSize::Letter => 279.4,
            PageSize::Custom { height_mm, .. } => *height_mm,
        }
    }

    fn size_pt(&self) -> (f64, f64) {
        (self.width_mm() * MM_TO_PT, self.height_mm() * MM_TO_PT)
    }
}

/// Where the full image sits on one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlacement {
    pub index: usize,
    /// Vertical offset of the image top from the page top, in mm (zero or negative)
    pub offset_mm: f64,
    /// Slice of the scaled image visible on this page
    pub visible_from_mm: f64,
    pub visible_to_mm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    pub image_width_mm: f64,
    pub image_height_mm: f64,
    pub page: PageSize,
    pub placements: Vec<PagePlacement>,
}

impl PagePlan {
    pub fn page_count(&self) -> usize {
        self.placements.len()
    }
}

/// Lay out a `width_px` by `height_px` raster on pages of `page`.
pub fn plan_pages(width_px: u32, height_px: u32, page: PageSize) -> Result<PagePlan> {
    if width_px == 0 || height_px == 0 {
        return Err(Error::CaptureFailed(format!(
            "cannot paginate a {}x{} raster",
            width_px, height_px
        )));
    }
    let page_w = page.width_mm();
    let page_h = page.height_mm();
    if !(page_w > 0.0 && page_h > 0.0) {
        return Err(Error::ConfigError("page size must be positive".into()));
    }

    let image_width_mm = page_w;
    let image_height_mm = height_px as f64 * image_width_mm / width_px as f64;

    let mut placements = Vec::new();
    let mut height_left = image_height_mm;
    loop {
        let index = placements.len();
        let top = index as f64 * page_h;
        placements.push(PagePlacement {
            index,
            offset_mm: -top,
            visible_from_mm: top,
            visible_to_mm: (top + page_h).min(image_height_mm),
        });
        height_left -= page_h;
        if height_left <= HEIGHT_EPSILON_MM {
            break;
        }
    }

    Ok(PagePlan { image_width_mm, image_height_mm, page, placements })
}

/// A finished PDF, ready for a sink.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub page_count: usize,
    pub plan: PagePlan,
}

impl ExportArtifact {
    /// SHA-256 of the PDF bytes, hex encoded.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[derive(Debug, Clone, Default)]
pub struct Paginator {
    page: PageSize,
}

impl Paginator {
    pub fn new(page: PageSize) -> Self {
        Self { page }
    }

    pub fn page_size(&self) -> PageSize {
        self.page
    }

    pub fn plan(&self, image: &RasterImage) -> Result<PagePlan> {
        plan_pages(image.width(), image.height(), self.page)
    }

    /// Encode `image` into a multi-page PDF named `filename`.
    pub fn paginate(&self, image: &RasterImage, filename: &str) -> Result<ExportArtifact> {
        let plan = self.plan(image)?;
        let (page_w_pt, page_h_pt) = self.page.size_pt();
        let img_w_pt = plan.image_width_mm * MM_TO_PT;
        let img_h_pt = plan.image_height_mm * MM_TO_PT;

        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let xobject = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width() as i64,
                "Height" => image.height() as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&image.to_rgb())?,
        );
        let image_id = doc.add_object(xobject);
        let resources_id = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        });

        let mut page_ids = Vec::with_capacity(plan.page_count());
        for placement in &plan.placements {
            // PDF space grows upwards from the page bottom
            let y_pt = (self.page.height_mm() - (placement.offset_mm + plan.image_height_mm)) * MM_TO_PT;
            let content = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![
                            (img_w_pt as f32).into(),
                            0.into(),
                            0.into(),
                            (img_h_pt as f32).into(),
                            0.into(),
                            (y_pt as f32).into(),
                        ],
                    ),
                    Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                    Operation::new("Q", vec![]),
                ],
            };
            let stream = Stream::new(dictionary! { "Filter" => "FlateDecode" }, deflate(&content.encode()?)?);
            let content_id = doc.add_object(stream);
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), (page_w_pt as f32).into(), (page_h_pt as f32).into()],
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            page_ids.push(page_id);
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| Object::from(*id)).collect::<Vec<Object>>(),
                "Count" => page_ids.len() as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(TITLE),
            "Producer" => Object::string_literal(PRODUCER),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        log::debug!(
            "paginated {}x{} raster into {} page(s), {} bytes",
            image.width(),
            image.height(),
            plan.page_count(),
            bytes.len()
        );

        Ok(ExportArtifact {
            filename: filename.to_string(),
            bytes,
            page_count: plan.page_count(),
            plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(w: u32, h: u32) -> RasterImage {
        RasterImage::from_rgba(w, h, 1, vec![255; (w * h * 4) as usize]).unwrap()
    }

    #[test]
    fn page_count_is_ceiling_of_scaled_height() {
        // 1700 wide at 2x: 6600 rows scale to ~815.29mm, i.e. 3 A4 pages
        let plan = plan_pages(1700, 6600, PageSize::A4).unwrap();
        assert!((plan.image_height_mm - 815.294).abs() < 0.01);
        assert_eq!(plan.page_count(), 3);

        assert_eq!(plan_pages(1700, 1, PageSize::A4).unwrap().page_count(), 1);
        assert_eq!(plan_pages(1700, 2404, PageSize::A4).unwrap().page_count(), 1);
        assert_eq!(plan_pages(1700, 2405, PageSize::A4).unwrap().page_count(), 2);
    }

    #[test]
    fn exact_multiples_do_not_add_a_blank_page() {
        assert_eq!(plan_pages(210, 594, PageSize::A4).unwrap().page_count(), 2);
        assert_eq!(plan_pages(210, 595, PageSize::A4).unwrap().page_count(), 3);
        assert_eq!(plan_pages(210, 297, PageSize::A4).unwrap().page_count(), 1);
    }

    #[test]
    fn windows_cover_the_image_once() {
        let plan = plan_pages(850, 4000, PageSize::A4).unwrap();
        let mut covered = 0.0;
        for (k, p) in plan.placements.iter().enumerate() {
            assert_eq!(p.index, k);
            assert!((p.offset_mm + k as f64 * 297.0).abs() < 1e-9);
            assert!((p.visible_from_mm - covered).abs() < 1e-9);
            covered = p.visible_to_mm;
        }
        assert!((covered - plan.image_height_mm).abs() < 1e-9);
    }

    #[test]
    fn letter_and_custom_pages() {
        assert_eq!(PageSize::Letter.width_mm(), 215.9);
        let custom = PageSize::Custom { width_mm: 100.0, height_mm: 100.0 };
        assert_eq!(plan_pages(100, 250, custom).unwrap().page_count(), 3);
        assert!(matches!(plan_pages(0, 10, PageSize::A4), Err(Error::CaptureFailed(_))));
    }

    #[test]
    fn pdf_has_one_page_per_placement() {
        let artifact = Paginator::new(PageSize::A4).paginate(&raster(170, 660), "out.pdf").unwrap();
        assert_eq!(artifact.page_count, 3);
        assert!(artifact.bytes.starts_with(b"%PDF-1.7"));
        let doc = lopdf::Document::load_mem(&artifact.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn pdf_output_is_deterministic() {
        let p = Paginator::default();
        let a = p.paginate(&raster(40, 100), "a.pdf").unwrap();
        let b = p.paginate(&raster(40, 100), "a.pdf").unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.filename, "a.pdf");
    }
}
