//! Command-line front end: export, scale and plan.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rfexport::paginator::plan_pages;
use rfexport::scaler::scale_factor;
use rfexport::{
    Delivery, DirectorySink, ExportConfig, ExportController, ExportOutcome, PageSize, Rasterizer,
    ResumeSource, StagedDocument,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rfexport", version, about = "Export rendered resume markup to a paginated PDF")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export an HTML file to PDF
    Export {
        /// Markup to export
        input: PathBuf,
        /// Directory the PDF is written to
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        #[arg(long)]
        filename: Option<String>,
        #[arg(long)]
        density: Option<u32>,
        /// JSON configuration file; unnamed fields keep their defaults
        #[arg(long)]
        config: Option<PathBuf>,
        /// Offer an already hosted PDF instead of exporting
        #[arg(long)]
        hosted_url: Option<String>,
        /// Also write the captured raster as PNG
        #[arg(long)]
        preview_png: Option<PathBuf>,
    },
    /// Print the preview scale factor for a container width
    Scale {
        #[arg(long)]
        container_width: f32,
        #[arg(long, default_value_t = rfexport::PREVIEW_MARGIN)]
        margin: u32,
        #[arg(long, default_value_t = rfexport::CANONICAL_WIDTH)]
        canonical_width: u32,
    },
    /// Print the A4 page plan for a rendered height
    Plan {
        /// Rendered height in logical pixels
        #[arg(long)]
        height: u32,
        #[arg(long, default_value_t = 2)]
        density: u32,
        #[arg(long, default_value_t = rfexport::CANONICAL_WIDTH)]
        canonical_width: u32,
    },
}

/// Raster size of a `width` x `height` capture at `density`.
fn capture_size(width: u32, height: u32, density: u32) -> anyhow::Result<(u32, u32)> {
    if density == 0 {
        bail!("density must be at least 1");
    }
    match (width.checked_mul(density), height.checked_mul(density)) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => bail!("{}x{} px at density {} overflows", width, height, density),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Export {
            input,
            out_dir,
            filename,
            density,
            config,
            hosted_url,
            preview_png,
        } => {
            let mut cfg = match &config {
                Some(path) => ExportConfig::from_json_file(path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => ExportConfig::default(),
            };
            if let Some(name) = filename {
                cfg.filename = name;
            }
            if let Some(d) = density {
                cfg.capture_density = d;
            }
            if cfg.base_dir.is_none() {
                cfg.base_dir = input.parent().map(|p| p.to_path_buf());
            }
            cfg.validate()?;

            let markup = match hosted_url.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                Some(_) => None,
                None => Some(
                    std::fs::read_to_string(&input)
                        .with_context(|| format!("reading {}", input.display()))?,
                ),
            };
            let source = ResumeSource::from_parts(markup, hosted_url.as_deref())?;

            if let (Some(png_path), ResumeSource::Markup(doc)) = (&preview_png, &source) {
                let rasterizer = Rasterizer::from_config(&cfg)?;
                let staged = StagedDocument {
                    document: doc.clone(),
                    width: cfg.canonical_width,
                    resources: None,
                };
                let shot = tokio::task::spawn_blocking(move || {
                    rasterizer.rasterize(&staged).and_then(|img| img.screenshot())
                })
                .await??;
                std::fs::write(png_path, &shot.png_data)
                    .with_context(|| format!("writing {}", png_path.display()))?;
                println!("preview {}x{} -> {}", shot.width, shot.height, png_path.display());
            }

            let controller = ExportController::builder(cfg)
                .sink(Arc::new(DirectorySink::new(out_dir)))
                .build()?;
            let delivery = controller.deliver(source).await;
            controller.close().await?;

            match delivery {
                Delivery::Hosted(url) => println!("hosted resume: {}", url),
                Delivery::Exported(ExportOutcome::Completed(report)) => {
                    println!(
                        "{} ({} page(s), {} bytes, sha256 {})",
                        report.location.unwrap_or(report.filename),
                        report.page_count,
                        report.byte_len,
                        report.digest
                    );
                }
                Delivery::Exported(ExportOutcome::Failed(reason)) => bail!("export failed: {}", reason),
                Delivery::Exported(ExportOutcome::Ignored) => bail!("export already in progress"),
            }
        }
        Command::Scale {
            container_width,
            margin,
            canonical_width,
        } => {
            let f = scale_factor(container_width, margin as f32, canonical_width as f32);
            println!("{:.4}", f);
        }
        Command::Plan {
            height,
            density,
            canonical_width,
        } => {
            let (px_w, px_h) = capture_size(canonical_width, height, density)?;
            let plan = plan_pages(px_w, px_h, PageSize::A4)?;
            println!(
                "{}x{} px -> {:.2} x {:.2} mm, {} page(s)",
                px_w,
                px_h,
                plan.image_width_mm,
                plan.image_height_mm,
                plan.page_count()
            );
            for p in &plan.placements {
                println!(
                    "  page {}: offset {:.2} mm, shows {:.2}..{:.2} mm",
                    p.index + 1,
                    p.offset_mm,
                    p.visible_from_mm,
                    p.visible_to_mm
                );
            }
        }
    }
    Ok(())
}
