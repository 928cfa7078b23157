#![cfg(feature = "remote-images")]
//! Image loading over HTTP, served by a local tiny_http server

use image::ImageEncoder;
use rfexport::{
    DocumentSubtree, ExportConfig, ExportController, ExportOutcome, ImagePolicy, MemorySink,
    RecordingNotifier,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiny_http::{Header, Response, Server};

fn png(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba(rgba));
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(img.as_raw(), w, h, image::ExtendedColorType::Rgba8)
        .unwrap();
    out
}

/// Serves `/logo.png` and answers 404 for everything else.
fn start_image_server() -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    let body = png(8, 4, [200, 30, 30, 255]);
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            if request.url() == "/logo.png" {
                let resp = Response::from_data(body.clone())
                    .with_header("Content-Type: image/png".parse::<Header>().unwrap());
                let _ = request.respond(resp);
            } else {
                let _ = request.respond(Response::from_string("missing").with_status_code(404));
            }
        }
    });
    format!("http://{}", addr)
}

/// Serves `/slow.png` after `delay`, one thread per request so a stalled
/// response never blocks the next one.
fn start_slow_image_server(delay: Duration) -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    let body = png(8, 4, [30, 30, 200, 255]);
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let body = body.clone();
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                let _ = request.respond(Response::from_data(body));
            });
        }
    });
    format!("http://{}", addr)
}

fn controller(policy: ImagePolicy) -> (ExportController, Arc<MemorySink>, Arc<RecordingNotifier>) {
    let cfg = ExportConfig { image_policy: policy, timeout_ms: 5000, ..Default::default() };
    controller_with(cfg)
}

fn controller_with(cfg: ExportConfig) -> (ExportController, Arc<MemorySink>, Arc<RecordingNotifier>) {
    let sink = Arc::new(MemorySink::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let c = ExportController::builder(cfg)
        .sink(sink.clone())
        .notifier(notifier.clone())
        .build()
        .unwrap();
    (c, sink, notifier)
}

#[tokio::test]
async fn remote_image_is_loaded_and_sized_intrinsically() {
    let base = start_image_server();
    let (c, _, _) = controller(ImagePolicy::Skip);
    let doc = DocumentSubtree::new(format!(r#"<img src="{}/logo.png">"#, base));
    let ExportOutcome::Completed(report) = c.export_now(&doc).await else {
        panic!("export failed");
    };
    // 8x4 intrinsic size at density 2
    assert_eq!(report.raster_height, 8);
}

#[tokio::test]
async fn broken_remote_image_is_skipped_by_default() {
    let base = start_image_server();
    let (c, sink, notifier) = controller(ImagePolicy::Skip);
    let doc = DocumentSubtree::new(format!(r#"<h1>Jane Doe</h1><img src="{}/gone.png">"#, base));
    assert!(c.export_now(&doc).await.is_completed());
    assert_eq!(sink.len(), 1);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn broken_remote_image_aborts_under_abort_policy() {
    let base = start_image_server();
    let (c, sink, notifier) = controller(ImagePolicy::Abort);
    let doc = DocumentSubtree::new(format!(r#"<h1>Jane Doe</h1><img src="{}/gone.png">"#, base));
    let outcome = c.export_now(&doc).await;
    assert!(matches!(outcome, ExportOutcome::Failed(ref m) if m.contains("gone.png")));
    assert!(sink.is_empty());
    assert_eq!(notifier.messages().len(), 1);
    assert_eq!(c.root().attached_hosts(), 0);
}

#[tokio::test]
async fn slow_image_is_skipped_after_its_own_timeout() {
    let base = start_slow_image_server(Duration::from_secs(3));
    let cfg = ExportConfig { timeout_ms: 300, ..Default::default() };
    let (c, sink, notifier) = controller_with(cfg);
    let doc = DocumentSubtree::new(format!(r#"<h1>Jane Doe</h1><img src="{}/slow.png">"#, base));

    let started = Instant::now();
    let ExportOutcome::Completed(report) = c.export_now(&doc).await else {
        panic!("a slow image must not fail the export under the skip policy");
    };
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.page_count, 1);
    assert_eq!(sink.len(), 1);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn settle_timeout_fails_the_export_and_removes_the_host() {
    let base = start_slow_image_server(Duration::from_secs(2));
    let cfg = ExportConfig { timeout_ms: 5000, settle_timeout_ms: 50, ..Default::default() };
    let (c, sink, notifier) = controller_with(cfg);
    let doc = DocumentSubtree::new(format!(r#"<h1>Jane Doe</h1><img src="{}/slow.png">"#, base));

    let outcome = c.export_now(&doc).await;
    assert!(matches!(outcome, ExportOutcome::Failed(ref m) if m.contains("timed out")));
    assert!(sink.is_empty());
    assert_eq!(notifier.messages().len(), 1);
    assert_eq!(c.root().attached_hosts(), 0);
}
