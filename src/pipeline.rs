//! Capture pipeline orchestrating registration, compression and dispatch
//!
//! [`CapturePipeline`] owns the process-wide pools. Each test run gets an
//! [`Execution`] handle from [`CapturePipeline::register`]; interaction hooks
//! feed events into [`Execution::on_event`], which never fails the caller.

use crate::{
    acquire, describe_error, fail_open, BrowserSession, CaptureClient, CaptureConfig,
    CaptureError, CaptureJob, CaptureMetrics, CaptureRequest, CompressionPool, Compressor,
    DrainOutcome, DrainReport, ExecutionId, ExecutionRegistry, HttpCaptureClient, LanePool,
    LaneStats, PipelineStats, TerminalGuard,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, trace, warn};

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;

/// Lifecycle of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
    Clean,
    TimedOut,
}

/// Asynchronous screenshot capture for UI tests
///
/// # Examples
///
/// ```rust,no_run
/// use evidence_capture::{CaptureConfig, CapturePipeline, CaptureRequest, TerminalState};
///
/// # async fn run(page: chromiumoxide::Page) -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = CapturePipeline::from_config(CaptureConfig::from_env()?).await?;
///
/// let execution = pipeline.register("checkout_test").await;
/// execution.on_event(CaptureRequest::navigate("https://shop.local"), &page).await;
/// execution.on_event(CaptureRequest::terminal(TerminalState::Pass), &page).await;
///
/// let report = pipeline.shutdown().await;
/// println!("Drained with {} screenshots abandoned", report.abandoned);
/// # Ok(())
/// # }
/// ```
pub struct CapturePipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    config: CaptureConfig,
    registry: ExecutionRegistry,
    compression: CompressionPool,
    lanes: LanePool,
    metrics: Arc<CaptureMetrics>,
    state: AtomicU8,
    report: OnceCell<DrainReport>,
}

impl CapturePipeline {
    /// Builds the pipeline against the HTTP capture service, probing for the
    /// palette-reduction tool once.
    pub async fn from_config(config: CaptureConfig) -> Result<Self, CaptureError> {
        config.validate()?;

        let client: Arc<dyn CaptureClient> = if config.is_required() {
            Arc::new(HttpCaptureClient::new(&config)?)
        } else {
            Arc::new(DisabledClient)
        };

        let compressor = if config.is_required() {
            Compressor::detect(config.compressor.clone()).await
        } else {
            Compressor::new(config.compressor.clone(), false)
        };

        Self::new(config, client, compressor)
    }

    /// Builds the pipeline from explicit collaborators.
    pub fn new(
        config: CaptureConfig,
        client: Arc<dyn CaptureClient>,
        compressor: Compressor,
    ) -> Result<Self, CaptureError> {
        config.validate()?;

        let metrics = Arc::new(CaptureMetrics::new());
        let compression =
            CompressionPool::new(compressor, config.compression_workers, metrics.clone());
        let lanes = LanePool::new(
            config.dispatch_lanes,
            config.lane_queue_capacity,
            client.clone(),
            metrics.clone(),
        );

        if config.is_required() {
            info!(
                "Capture enabled: {} lanes, {} compression workers",
                config.dispatch_lanes, config.compression_workers
            );
        } else {
            debug!("Capture not configured, events will be ignored");
        }

        Ok(Self {
            inner: Arc::new(PipelineInner {
                config,
                registry: ExecutionRegistry::new(client),
                compression,
                lanes,
                metrics,
                state: AtomicU8::new(RUNNING),
                report: OnceCell::new(),
            }),
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.inner.config
    }

    /// Registers a test run.
    ///
    /// Never fails: when capture is off or the service cannot be reached the
    /// returned execution simply ignores its events.
    pub async fn register(&self, test_id: &str) -> Execution {
        let id = if !self.inner.config.is_required() {
            None
        } else {
            match self.inner.registry.register(test_id).await {
                Ok(id) => Some(id),
                Err(e) => {
                    error!("Unable to create capture execution for {}: {}", test_id, e);
                    self.inner.metrics.record_registration_failure();
                    None
                }
            }
        };

        Execution {
            test_id: test_id.to_string(),
            id,
            guard: TerminalGuard::new(),
            capture_lock: Mutex::new(()),
            pipeline: self.inner.clone(),
        }
    }

    pub fn state(&self) -> PipelineState {
        match self.inner.report.get() {
            Some(report) if report.is_clean() => PipelineState::Clean,
            Some(_) => PipelineState::TimedOut,
            None if self.inner.state.load(Ordering::Acquire) == DRAINING => {
                PipelineState::Draining
            }
            None => PipelineState::Running,
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.inner.metrics.snapshot()
    }

    pub fn lane_stats(&self) -> Vec<LaneStats> {
        self.inner.lanes.stats()
    }

    /// Drains with the configured per-lane timeout and deadline.
    pub async fn shutdown(&self) -> DrainReport {
        self.shutdown_with_timeout(
            self.inner.config.lane_drain_timeout,
            self.inner.config.drain_deadline,
        )
        .await
    }

    /// Stops accepting events and drains the backlog.
    ///
    /// Runs once; later or concurrent calls get the first call's report.
    pub async fn shutdown_with_timeout(
        &self,
        lane_timeout: Duration,
        deadline: Duration,
    ) -> DrainReport {
        let inner = &self.inner;
        *inner
            .report
            .get_or_init(|| async move {
                inner.state.store(DRAINING, Ordering::Release);

                if !inner.config.is_required() {
                    inner.lanes.stop().await;
                    return DrainReport {
                        outcome: DrainOutcome::Clean,
                        abandoned: 0,
                        elapsed: Duration::ZERO,
                    };
                }

                info!("Processing remaining screenshot capture backlog...");
                let report = inner.lanes.drain(lane_timeout, deadline).await;

                if report.is_clean() {
                    info!(
                        "Finished processing backlog in {}",
                        crate::format_duration(report.elapsed)
                    );
                } else {
                    inner.metrics.record_abandoned(report.abandoned);
                    error!(
                        "Shutdown timed out. {} screenshots not sent.",
                        report.abandoned
                    );
                }

                report
            })
            .await
    }

    /// Drains the pipeline when the process receives a termination signal.
    pub fn drain_on_signal(&self) -> tokio::task::JoinHandle<Option<DrainReport>> {
        let pipeline = Self {
            inner: self.inner.clone(),
        };

        tokio::spawn(async move {
            if let Err(e) = crate::wait_for_shutdown_signal().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return None;
            }
            Some(pipeline.shutdown().await)
        })
    }
}

/// Capture session of one test run.
pub struct Execution {
    test_id: String,
    id: Option<ExecutionId>,
    guard: TerminalGuard,
    /// Held from the terminal check until the job is queued, so events of one
    /// execution enter their lane in the order they passed the guard.
    capture_lock: Mutex<()>,
    pipeline: Arc<PipelineInner>,
}

impl Execution {
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn id(&self) -> Option<&ExecutionId> {
        self.id.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.id.is_some()
    }

    pub fn final_screenshot_sent(&self) -> bool {
        self.guard.final_sent()
    }

    /// Captures `request` from `session`.
    pub async fn on_event(&self, request: CaptureRequest, session: &dyn BrowserSession) {
        self.capture(request, session, None).await
    }

    /// Captures `request` together with the error that triggered it.
    pub async fn on_event_with_error(
        &self,
        request: CaptureRequest,
        session: &dyn BrowserSession,
        error_message: impl Into<String>,
    ) {
        self.capture(request, session, Some(error_message.into()))
            .await
    }

    /// Captures a terminal or failure event caused by `err` and its sources.
    pub async fn on_failure(
        &self,
        request: CaptureRequest,
        session: &dyn BrowserSession,
        err: &(dyn std::error::Error + 'static),
    ) {
        self.capture(request, session, Some(describe_error(err)))
            .await
    }

    /// Captures a script execution unless the script is framework-internal.
    pub async fn on_script(&self, source: &str, session: &dyn BrowserSession) {
        if self
            .pipeline
            .config
            .ignored_scripts
            .iter()
            .any(|ignored| ignored == source)
        {
            self.pipeline.metrics.record_ignored_script();
            return;
        }
        self.on_event(CaptureRequest::script(source), session).await
    }

    async fn capture(
        &self,
        request: CaptureRequest,
        session: &dyn BrowserSession,
        error_message: Option<String>,
    ) {
        let metrics = &self.pipeline.metrics;
        metrics.record_event();

        let Some(execution_id) = &self.id else {
            debug!(
                "Can't send screenshot, capture didn't initialise execution for {}",
                self.test_id
            );
            metrics.record_skipped_unregistered();
            return;
        };

        let _serial = self.capture_lock.lock().await;

        if self.pipeline.state.load(Ordering::Acquire) != RUNNING {
            warn!(
                "Capture is shutting down, {} screenshot for {} not sent",
                request.action, execution_id
            );
            metrics.record_rejected();
            return;
        }

        if !self.guard.should_send(&request.action) {
            debug!(
                "Final screenshot already sent for {}, skipping {}",
                execution_id, request.action
            );
            metrics.record_skipped_after_terminal();
            return;
        }

        let Some(image) = fail_open("Screenshot acquisition", async {
            acquire(session).await.map_err(|e| {
                trace!("Acquisition error for {}: {:?}", execution_id, e);
                e
            })
        })
        .await
        else {
            metrics.record_acquisition_failure();
            return;
        };

        let payload = self.pipeline.compression.submit(image.bytes);
        let job = CaptureJob::new(
            execution_id.clone(),
            request,
            image.url,
            error_message,
            payload,
        );

        match self.pipeline.lanes.dispatch(job).await {
            Ok(lane) => trace!("Queued screenshot for {} on lane {}", execution_id, lane),
            Err(e) => {
                warn!("Screenshot for {} not queued: {}", execution_id, e);
                metrics.record_rejected();
            }
        }
    }
}

/// Client used while capture is not configured; never reached by events.
struct DisabledClient;

#[async_trait::async_trait]
impl CaptureClient for DisabledClient {
    async fn create_execution(
        &self,
        _message: &crate::CreateExecution,
    ) -> Result<ExecutionId, CaptureError> {
        Err(CaptureError::Configuration(
            "Capture is not configured".to_string(),
        ))
    }

    async fn send_screenshot(
        &self,
        _message: &crate::CreateScreenshot,
    ) -> Result<(), CaptureError> {
        Err(CaptureError::Configuration(
            "Capture is not configured".to_string(),
        ))
    }
}
