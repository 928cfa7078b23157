//! Export controller: stage, settle, rasterize and paginate behind a busy guard.
//!
//! One export runs at a time. A request made while another is in flight is
//! ignored rather than queued. Failures never escape: they are turned into a
//! single user-facing notification and the controller returns to idle with
//! no staging host left behind.

use crate::document::{DocumentRoot, DocumentSubtree};
use crate::paginator::Paginator;
use crate::stager::OffscreenStager;
use crate::worker::RasterWorker;
use crate::{Error, ExportConfig, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use url::Url;

pub use crate::paginator::ExportArtifact;

/// Shown to the user whenever an export fails, whatever the cause.
pub const FAILURE_MESSAGE: &str = "Failed to generate PDF. Please try again.";

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Staging,
    Rasterizing,
    Paginating,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    StateChanged(ExportState),
    ArtifactReady {
        filename: String,
        page_count: usize,
        byte_len: usize,
        digest: String,
    },
    Failed {
        message: String,
    },
    /// Fire-and-forget completion signal for the UI, sent after a delay
    Finished,
}

/// Summary of a completed export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub filename: String,
    pub page_count: usize,
    pub byte_len: usize,
    pub digest: String,
    pub raster_width: u32,
    pub raster_height: u32,
    /// Where the sink put the artifact, if it has a location
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Completed(ExportReport),
    Failed(String),
    /// Another export was in flight
    Ignored,
}

impl ExportOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExportOutcome::Completed(_))
    }
}

/// Receives finished artifacts.
pub trait ArtifactSink: Send + Sync {
    /// Store `artifact`; returns its location when there is one.
    fn save(&self, artifact: &ExportArtifact) -> Result<Option<String>>;
}

/// Writes artifacts into a directory under their filename.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for DirectorySink {
    fn save(&self, artifact: &ExportArtifact) -> Result<Option<String>> {
        // Only the final component is used; the filename never escapes the directory
        let name = Path::new(&artifact.filename)
            .file_name()
            .ok_or_else(|| Error::ConfigError(format!("invalid filename {:?}", artifact.filename)))?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        std::fs::write(&path, &artifact.bytes)?;
        Ok(Some(path.display().to_string()))
    }
}

/// Keeps artifacts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    artifacts: Mutex<Vec<ExportArtifact>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<ExportArtifact> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<ExportArtifact> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }
}

impl ArtifactSink for MemorySink {
    fn save(&self, artifact: &ExportArtifact) -> Result<Option<String>> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(artifact.clone());
        Ok(None)
    }
}

/// User-visible failure notifications.
pub trait Notifier: Send + Sync {
    fn notify_failure(&self, message: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_failure(&self, message: &str) {
        log::error!("{}", message);
    }
}

/// Collects notifications, for tests and embedding UIs that poll.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_failure(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

/// Where the resume comes from.
#[derive(Debug, Clone)]
pub enum ResumeSource {
    /// Rendered markup, exported through the pipeline
    Markup(DocumentSubtree),
    /// A PDF already hosted upstream; offered as-is
    Hosted(Url),
}

impl ResumeSource {
    /// A non-empty hosted URL wins over markup.
    pub fn from_parts(markup: Option<String>, hosted_url: Option<&str>) -> Result<Self> {
        if let Some(raw) = hosted_url.map(str::trim).filter(|s| !s.is_empty()) {
            let url = Url::parse(raw).map_err(|e| Error::ConfigError(format!("invalid hosted URL {:?}: {}", raw, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::ConfigError(format!("hosted URL must be http(s), got {}", url.scheme())));
            }
            return Ok(ResumeSource::Hosted(url));
        }
        markup
            .map(|m| ResumeSource::Markup(DocumentSubtree::new(m)))
            .ok_or_else(|| Error::ConfigError("no markup and no hosted URL".into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Exported(ExportOutcome),
    Hosted(Url),
}

/// Cooperative cancellation for an export.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let fired = rx.wait_for(|c| *c).await.is_ok();
        if !fired {
            // The sender lives as long as self
            std::future::pending::<()>().await;
        }
    }
}

/// Returns the controller to idle when dropped, including when the export
/// future itself is dropped mid-flight.
struct BusyGuard<'a>(&'a ExportController);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let c = self.0;
        // Both under the state lock: a later export's Staging cannot be overwritten
        let mut state = c.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = ExportState::Idle;
        c.busy.store(false, Ordering::Release);
        log::debug!("export state -> {:?}", ExportState::Idle);
        c.emit(ExportEvent::StateChanged(ExportState::Idle));
    }
}

pub struct ExportControllerBuilder {
    config: ExportConfig,
    root: Option<DocumentRoot>,
    sink: Option<Arc<dyn ArtifactSink>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl ExportControllerBuilder {
    /// Share a root with the embedding UI.
    pub fn root(mut self, root: DocumentRoot) -> Self {
        self.root = Some(root);
        self
    }

    pub fn sink<S: ArtifactSink + 'static>(mut self, sink: Arc<S>) -> Self {
        self.sink = Some(sink as Arc<dyn ArtifactSink>);
        self
    }

    pub fn notifier<N: Notifier + 'static>(mut self, notifier: Arc<N>) -> Self {
        self.notifier = Some(notifier as Arc<dyn Notifier>);
        self
    }

    /// Validate the configuration and start the raster worker.
    pub fn build(self) -> Result<ExportController> {
        self.config.validate()?;
        let worker = RasterWorker::spawn(&self.config)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(ExportController {
            stager: OffscreenStager::from_config(&self.config),
            paginator: Paginator::new(self.config.page_size),
            root: self.root.unwrap_or_default(),
            sink: self
                .sink
                .unwrap_or_else(|| Arc::new(MemorySink::new()) as Arc<dyn ArtifactSink>),
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(LogNotifier) as Arc<dyn Notifier>),
            worker,
            busy: AtomicBool::new(false),
            state: Mutex::new(ExportState::Idle),
            events,
            config: self.config,
        })
    }
}

pub struct ExportController {
    config: ExportConfig,
    root: DocumentRoot,
    stager: OffscreenStager,
    worker: RasterWorker,
    paginator: Paginator,
    sink: Arc<dyn ArtifactSink>,
    notifier: Arc<dyn Notifier>,
    busy: AtomicBool,
    state: Mutex<ExportState>,
    events: broadcast::Sender<ExportEvent>,
}

impl ExportController {
    pub fn builder(config: ExportConfig) -> ExportControllerBuilder {
        ExportControllerBuilder {
            config,
            root: None,
            sink: None,
            notifier: None,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn root(&self) -> &DocumentRoot {
        &self.root
    }

    pub fn state(&self) -> ExportState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExportEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ExportEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: ExportState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = next;
        log::debug!("export state -> {:?}", next);
        self.emit(ExportEvent::StateChanged(next));
    }

    fn schedule_finished(&self, delay: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ExportEvent::Finished);
        });
    }

    /// Export `doc` unless another export is running.
    pub async fn export_now(&self, doc: &DocumentSubtree) -> ExportOutcome {
        self.export_with_cancel(doc, &CancelHandle::new()).await
    }

    pub async fn export_with_cancel(&self, doc: &DocumentSubtree, cancel: &CancelHandle) -> ExportOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("{}; request ignored", Error::Busy);
            return ExportOutcome::Ignored;
        }
        let _busy = BusyGuard(self);

        let outcome = match self.run_pipeline(doc, cancel).await {
            Ok(report) => {
                self.set_state(ExportState::Complete);
                log::info!(
                    "exported {} ({} page(s), {} bytes)",
                    report.filename,
                    report.page_count,
                    report.byte_len
                );
                self.emit(ExportEvent::ArtifactReady {
                    filename: report.filename.clone(),
                    page_count: report.page_count,
                    byte_len: report.byte_len,
                    digest: report.digest.clone(),
                });
                self.schedule_finished(Duration::from_millis(self.config.post_export_delay_ms));
                ExportOutcome::Completed(report)
            }
            Err(Error::Cancelled) => {
                self.set_state(ExportState::Failed);
                log::info!("export cancelled");
                self.emit(ExportEvent::Failed { message: Error::Cancelled.to_string() });
                ExportOutcome::Failed(Error::Cancelled.to_string())
            }
            Err(e) => {
                self.set_state(ExportState::Failed);
                log::error!("PDF generation failed: {}", e);
                self.notifier.notify_failure(FAILURE_MESSAGE);
                self.emit(ExportEvent::Failed { message: FAILURE_MESSAGE.to_string() });
                ExportOutcome::Failed(e.to_string())
            }
        };

        if let Err(e) = self.root.ensure_clean() {
            log::error!("{}", e);
        }
        outcome
    }

    async fn run_pipeline(&self, doc: &DocumentSubtree, cancel: &CancelHandle) -> Result<ExportReport> {
        self.set_state(ExportState::Staging);
        let host = self.stager.stage(&self.root, doc)?;
        let staged = host.settle(cancel).await?;

        self.set_state(ExportState::Rasterizing);
        let limit_ms = self.config.raster_timeout_ms;
        let image = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = tokio::time::timeout(Duration::from_millis(limit_ms), self.worker.rasterize(staged)) => {
                res.map_err(|_| Error::Timeout(limit_ms))??
            }
        };
        // Capture done; the host is no longer needed
        drop(host);

        self.set_state(ExportState::Paginating);
        let (raster_width, raster_height) = (image.width(), image.height());
        let paginator = self.paginator.clone();
        let filename = self.config.filename.clone();
        let artifact = tokio::task::spawn_blocking(move || paginator.paginate(&image, &filename))
            .await
            .map_err(|e| Error::Other(format!("pagination task failed: {}", e)))??;

        let report = ExportReport {
            filename: artifact.filename.clone(),
            page_count: artifact.page_count,
            byte_len: artifact.bytes.len(),
            digest: artifact.digest(),
            raster_width,
            raster_height,
            location: None,
        };
        let sink = self.sink.clone();
        let location = tokio::task::spawn_blocking(move || sink.save(&artifact))
            .await
            .map_err(|e| Error::Other(format!("sink task failed: {}", e)))??;

        Ok(ExportReport { location, ..report })
    }

    /// Offer the resume: hosted PDFs pass straight through, markup is exported.
    pub async fn deliver(&self, source: ResumeSource) -> Delivery {
        match source {
            ResumeSource::Hosted(url) => {
                log::info!("offering hosted resume {}", url);
                self.schedule_finished(Duration::from_millis(self.config.hosted_feedback_delay_ms));
                Delivery::Hosted(url)
            }
            ResumeSource::Markup(doc) => Delivery::Exported(self.export_now(&doc).await),
        }
    }

    /// Stop the raster worker.
    pub async fn close(&self) -> Result<()> {
        self.worker.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(config: ExportConfig) -> (ExportController, Arc<MemorySink>, Arc<RecordingNotifier>) {
        let sink = Arc::new(MemorySink::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let c = ExportController::builder(config)
            .sink(sink.clone())
            .notifier(notifier.clone())
            .build()
            .unwrap();
        (c, sink, notifier)
    }

    #[tokio::test]
    async fn completes_and_returns_to_idle() {
        let (c, sink, notifier) = controller(ExportConfig::default());
        let outcome = c.export_now(&DocumentSubtree::new("<h1>Jane Doe</h1>")).await;
        let ExportOutcome::Completed(report) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(report.filename, "Executive_Resume.pdf");
        assert_eq!(report.page_count, 1);
        assert_eq!(report.raster_width, 1700);
        assert_eq!(sink.len(), 1);
        assert!(notifier.messages().is_empty());
        assert_eq!(c.state(), ExportState::Idle);
        assert!(!c.is_busy());
    }

    #[tokio::test]
    async fn failure_notifies_once_and_leaves_no_host() {
        let (c, sink, notifier) = controller(ExportConfig::default());
        let outcome = c.export_now(&DocumentSubtree::new("<div></div>")).await;
        assert!(matches!(outcome, ExportOutcome::Failed(_)));
        assert_eq!(notifier.messages(), vec![FAILURE_MESSAGE.to_string()]);
        assert!(sink.is_empty());
        assert_eq!(c.root().attached_hosts(), 0);
        assert_eq!(c.state(), ExportState::Idle);
    }

    #[tokio::test]
    async fn state_changes_are_broadcast_in_order() {
        let (c, _, _) = controller(ExportConfig::default());
        let mut rx = c.subscribe();
        assert!(c.export_now(&DocumentSubtree::new("<p>x</p>")).await.is_completed());
        let mut states = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let ExportEvent::StateChanged(s) = ev {
                states.push(s);
            }
        }
        assert_eq!(
            states,
            vec![
                ExportState::Staging,
                ExportState::Rasterizing,
                ExportState::Paginating,
                ExportState::Complete,
                ExportState::Idle
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_skips_the_notifier() {
        let cfg = ExportConfig {
            settle: crate::SettlePolicy::FixedDelay,
            settle_delay_ms: 60_000,
            ..Default::default()
        };
        let (c, sink, notifier) = controller(cfg);
        let cancel = CancelHandle::new();
        cancel.cancel();
        let outcome = c.export_with_cancel(&DocumentSubtree::new("<p>x</p>"), &cancel).await;
        assert_eq!(outcome, ExportOutcome::Failed(Error::Cancelled.to_string()));
        assert!(notifier.messages().is_empty());
        assert!(sink.is_empty());
        assert_eq!(c.root().attached_hosts(), 0);
    }

    #[tokio::test]
    async fn dropped_export_returns_to_idle() {
        let cfg = ExportConfig {
            settle: crate::SettlePolicy::FixedDelay,
            settle_delay_ms: 60_000,
            ..Default::default()
        };
        let (c, sink, _) = controller(cfg);
        let doc = DocumentSubtree::new("<p>x</p>");
        let mut rx = c.subscribe();
        let res = tokio::time::timeout(Duration::from_millis(20), c.export_now(&doc)).await;
        assert!(res.is_err());
        assert_eq!(c.state(), ExportState::Idle);
        assert!(!c.is_busy());
        assert_eq!(c.root().attached_hosts(), 0);
        assert!(sink.is_empty());

        let mut last = None;
        while let Ok(ExportEvent::StateChanged(s)) = rx.try_recv() {
            last = Some(s);
        }
        assert_eq!(last, Some(ExportState::Idle));

        // A new request is accepted rather than ignored
        let cancel = CancelHandle::new();
        cancel.cancel();
        let outcome = c.export_with_cancel(&doc, &cancel).await;
        assert_eq!(outcome, ExportOutcome::Failed(Error::Cancelled.to_string()));
    }

    #[test]
    fn hosted_url_wins_over_markup() {
        let src = ResumeSource::from_parts(Some("<p>x</p>".into()), Some("https://cdn.example.com/r.pdf")).unwrap();
        assert!(matches!(src, ResumeSource::Hosted(_)));
        let src = ResumeSource::from_parts(Some("<p>x</p>".into()), Some("  ")).unwrap();
        assert!(matches!(src, ResumeSource::Markup(_)));
        assert!(ResumeSource::from_parts(None, Some("ftp://x/y.pdf")).is_err());
        assert!(ResumeSource::from_parts(None, None).is_err());
    }

    #[test]
    fn directory_sink_keeps_only_the_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = crate::Paginator::default()
            .paginate(
                &crate::RasterImage::from_rgba(2, 2, 1, vec![255; 16]).unwrap(),
                "../escape.pdf",
            )
            .unwrap();
        let loc = DirectorySink::new(dir.path()).save(&artifact).unwrap().unwrap();
        assert!(dir.path().join("escape.pdf").exists());
        assert!(loc.ends_with("escape.pdf"));
    }

    #[test]
    fn cancel_handle_flags() {
        let h = CancelHandle::new();
        let other = h.clone();
        assert!(!other.is_cancelled());
        h.cancel();
        assert!(other.is_cancelled());
    }
}
