//! The raster thread.
//!
//! A capture that panics is reported as a failed capture and the thread keeps
//! serving later requests.

use crate::rendering::raster::{RasterImage, Rasterizer};
use crate::stager::StagedDocument;
use crate::{Error, ExportConfig, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Rasterize(StagedDocument, oneshot::Sender<Result<RasterImage>>),
    Close(oneshot::Sender<Result<()>>),
}

/// Async facade over a rasterizer that lives on its own thread.
///
/// Captures are CPU bound and may block on image fetches, so they run off the
/// async executor. Commands are processed one at a time in submission order;
/// callers await the reply on a oneshot channel, which keeps resize handling
/// and other tasks responsive while a capture is in flight.
#[derive(Clone)]
pub struct RasterWorker {
    cmd_tx: Sender<Command>,
}

impl RasterWorker {
    /// Spawn the worker thread with a rasterizer built from `config`.
    pub fn spawn(config: &ExportConfig) -> Result<Self> {
        let rasterizer = Rasterizer::from_config(config)?;
        Self::with_rasterizer(rasterizer)
    }

    pub fn with_rasterizer(rasterizer: Rasterizer) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();

        thread::Builder::new()
            .name("rfexport-raster".into())
            .spawn(move || {
                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        Command::Rasterize(staged, resp) => {
                            let res = panic::catch_unwind(AssertUnwindSafe(|| rasterizer.rasterize(&staged)))
                                .unwrap_or_else(|_| {
                                    log::error!("rasterizer panicked; worker continues");
                                    Err(Error::CaptureFailed("rasterizer panicked".into()))
                                });
                            // The caller may have timed out or been cancelled
                            let _ = resp.send(res);
                        }
                        Command::Close(resp) => {
                            let _ = resp.send(Ok(()));
                            break;
                        }
                    }
                }
                log::debug!("raster worker stopped");
            })?;

        Ok(Self { cmd_tx })
    }

    /// Capture `staged` on the worker thread.
    pub async fn rasterize(&self, staged: StagedDocument) -> Result<RasterImage> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Rasterize(staged, tx))
            .map_err(|_| Error::Other("raster worker has stopped".into()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Rasterize canceled: {}", e)))?
    }

    /// Stop the worker thread after any queued captures.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close(tx)).is_err() {
            return Ok(());
        }
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocumentSubtree;

    fn staged(markup: &str) -> StagedDocument {
        StagedDocument {
            document: DocumentSubtree::new(markup),
            width: 850,
            resources: None,
        }
    }

    #[tokio::test]
    async fn rasterizes_off_thread() {
        let worker = RasterWorker::spawn(&ExportConfig::default()).unwrap();
        let img = worker.rasterize(staged(r#"<div style="height:50px"></div>"#)).await.unwrap();
        assert_eq!((img.width(), img.height()), (1700, 100));
        worker.close().await.unwrap();
    }

    #[tokio::test]
    async fn errors_cross_the_thread_boundary() {
        let worker = RasterWorker::spawn(&ExportConfig::default()).unwrap();
        let err = worker.rasterize(staged("")).await.unwrap_err();
        assert!(err.is_capture_failure());
    }

    #[tokio::test]
    async fn oversized_capture_fails_and_worker_survives() {
        let worker = RasterWorker::spawn(&ExportConfig::default()).unwrap();
        let err = worker
            .rasterize(staged(r#"<p>x</p><div style="height:9999999999px"></div>"#))
            .await
            .unwrap_err();
        assert!(err.is_capture_failure());
        let img = worker.rasterize(staged("<h1>Jane Doe</h1>")).await.unwrap();
        assert_eq!(img.width(), 1700);
        worker.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_worker_rejects_commands() {
        let worker = RasterWorker::spawn(&ExportConfig::default()).unwrap();
        worker.close().await.unwrap();
        assert!(worker.rasterize(staged("<p>x</p>")).await.is_err());
        // Closing twice is harmless
        assert!(worker.close().await.is_ok());
    }
}
