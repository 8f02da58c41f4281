//! Serial dispatch lanes
//!
//! Jobs are partitioned over a fixed set of lanes by a hash of their execution
//! id. Each lane is a single task draining a single queue, so jobs of one
//! execution reach the capture service in the order they were submitted while
//! different executions proceed in parallel.

use crate::{
    CaptureClient, CaptureError, CaptureMetrics, CaptureRequest, CreateScreenshot, DrainOutcome,
    DrainReport, ExecutionId, PendingPayload,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// One screenshot on its way to the capture service.
pub struct CaptureJob {
    pub job_id: String,
    pub execution_id: ExecutionId,
    pub request: CaptureRequest,
    pub current_url: String,
    pub error_message: Option<String>,
    pub payload: PendingPayload,
    pub queued_at: DateTime<Utc>,
}

impl CaptureJob {
    pub fn new(
        execution_id: ExecutionId,
        request: CaptureRequest,
        current_url: String,
        error_message: Option<String>,
        payload: PendingPayload,
    ) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            execution_id,
            request,
            current_url,
            error_message,
            payload,
            queued_at: Utc::now(),
        }
    }
}

/// Lane serving `execution_id` among `lane_count` lanes.
pub fn lane_index(execution_id: &ExecutionId, lane_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    execution_id.as_str().hash(&mut hasher);
    (hasher.finish() % lane_count.max(1) as u64) as usize
}

struct LaneWorker {
    id: usize,
    client: Arc<dyn CaptureClient>,
    metrics: Arc<CaptureMetrics>,
    pending: Arc<AtomicUsize>,
    is_running: Arc<AtomicBool>,
}

impl LaneWorker {
    async fn run(self, mut jobs: mpsc::Receiver<CaptureJob>, mut shutdown: watch::Receiver<bool>) {
        debug!("Starting dispatch lane {}", self.id);
        self.is_running.store(true, Ordering::Relaxed);
        let mut closing = false;

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed(), if !closing => {
                    if changed.is_err() || *shutdown.borrow() {
                        // Stop accepting; whatever is queued still drains below
                        jobs.close();
                        closing = true;
                    }
                }
                job = jobs.recv() => match job {
                    Some(job) => {
                        self.process(job).await;
                        self.pending.fetch_sub(1, Ordering::AcqRel);
                    }
                    None => break,
                },
            }
        }

        self.is_running.store(false, Ordering::Relaxed);
        debug!("Dispatch lane {} stopped", self.id);
    }

    async fn process(&self, job: CaptureJob) {
        let CaptureJob {
            job_id,
            execution_id,
            request,
            current_url,
            error_message,
            payload,
            queued_at,
        } = job;

        let image_base64 = match payload.await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    "Lane {} dropping job {} for {}: {}",
                    self.id,
                    job_id,
                    execution_id,
                    CaptureError::from(e)
                );
                self.metrics.record_dispatch(false);
                return;
            }
        };

        debug!(
            "Lane {} sending {} for {} after {}ms in queue",
            self.id,
            request.action,
            execution_id,
            (Utc::now() - queued_at).num_milliseconds()
        );

        let message = CreateScreenshot {
            execution_id,
            action: request.action,
            locator: request.locator,
            detail: request.detail,
            url: current_url,
            error_message,
            image_base64,
        };

        match self.client.send_screenshot(&message).await {
            Ok(()) => self.metrics.record_dispatch(true),
            Err(e) => {
                warn!(
                    "Failed sending screenshot to capture for {}: {}",
                    message.execution_id, e
                );
                self.metrics.record_dispatch(false);
            }
        }
    }
}

struct Lane {
    id: usize,
    sender: mpsc::Sender<CaptureJob>,
    pending: Arc<AtomicUsize>,
    is_running: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct LaneStats {
    pub id: usize,
    pub is_running: bool,
    pub pending: usize,
}

/// Fixed set of serial lanes.
pub struct LanePool {
    lanes: Vec<Lane>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl LanePool {
    pub fn new(
        lane_count: usize,
        queue_capacity: usize,
        client: Arc<dyn CaptureClient>,
        metrics: Arc<CaptureMetrics>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut lanes = Vec::with_capacity(lane_count);
        let mut handles = Vec::with_capacity(lane_count);

        for id in 0..lane_count.max(1) {
            let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
            let pending = Arc::new(AtomicUsize::new(0));
            let is_running = Arc::new(AtomicBool::new(true));

            let worker = LaneWorker {
                id,
                client: client.clone(),
                metrics: metrics.clone(),
                pending: pending.clone(),
                is_running: is_running.clone(),
            };
            handles.push(tokio::spawn(worker.run(receiver, shutdown_rx.clone())));

            lanes.push(Lane {
                id,
                sender,
                pending,
                is_running,
            });
        }

        info!("Dispatch pool started with {} lanes", lanes.len());

        Self {
            lanes,
            handles: Mutex::new(handles),
            shutdown,
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Queues `job` on the lane owning its execution.
    pub async fn dispatch(&self, job: CaptureJob) -> Result<usize, CaptureError> {
        let lane = &self.lanes[lane_index(&job.execution_id, self.lanes.len())];

        lane.pending.fetch_add(1, Ordering::AcqRel);
        if lane.sender.send(job).await.is_err() {
            lane.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(CaptureError::ShuttingDown);
        }

        Ok(lane.id)
    }

    pub fn pending(&self) -> usize {
        self.lanes
            .iter()
            .map(|lane| lane.pending.load(Ordering::Acquire))
            .sum()
    }

    pub fn stats(&self) -> Vec<LaneStats> {
        self.lanes
            .iter()
            .map(|lane| LaneStats {
                id: lane.id,
                is_running: lane.is_running.load(Ordering::Relaxed),
                pending: lane.pending.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Stops the lanes without waiting for their backlog.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles.lock().await.drain(..) {
            handle.abort();
        }
    }

    /// Closes every queue and waits for the backlog.
    ///
    /// Each lane gets `lane_timeout`; all lanes are awaited in parallel under
    /// `deadline`. Lanes still busy afterwards are aborted and their queued
    /// and in-flight jobs are counted as abandoned.
    pub async fn drain(&self, lane_timeout: Duration, deadline: Duration) -> DrainReport {
        let started = std::time::Instant::now();
        let _ = self.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let waits = handles.into_iter().enumerate().map(|(id, mut handle)| async move {
            match timeout(lane_timeout, &mut handle).await {
                Ok(_) => true,
                Err(_) => {
                    warn!("Dispatch lane {} did not finish within {:?}", id, lane_timeout);
                    handle.abort();
                    false
                }
            }
        });

        let finished = match timeout(deadline, join_all(waits)).await {
            Ok(results) => results.into_iter().all(|done| done),
            Err(_) => {
                error!("Drain deadline of {:?} elapsed", deadline);
                false
            }
        };

        if !finished {
            for abort in &aborts {
                abort.abort();
            }
        }

        let abandoned = if finished { 0 } else { self.pending() };
        let outcome = if finished && abandoned == 0 {
            DrainOutcome::Clean
        } else {
            DrainOutcome::TimedOut
        };

        DrainReport {
            outcome,
            abandoned,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CreateExecution;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Records the order in which sends start and finish.
    struct SlowSink {
        delay: Duration,
        log: StdMutex<Vec<String>>,
    }

    impl SlowSink {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                log: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CaptureClient for SlowSink {
        async fn create_execution(
            &self,
            _message: &CreateExecution,
        ) -> Result<ExecutionId, CaptureError> {
            Ok(ExecutionId::new("unused"))
        }

        async fn send_screenshot(&self, message: &CreateScreenshot) -> Result<(), CaptureError> {
            self.log.lock().unwrap().push(format!("start:{}", message.detail));
            tokio::time::sleep(self.delay).await;
            self.log.lock().unwrap().push(format!("end:{}", message.detail));
            Ok(())
        }
    }

    fn job(execution: &str, detail: &str, compress_for: Duration) -> CaptureJob {
        let payload = tokio::spawn(async move {
            tokio::time::sleep(compress_for).await;
            "cGF5bG9hZA==".to_string()
        });
        CaptureJob::new(
            ExecutionId::new(execution),
            CaptureRequest::new("click", "n/a", detail),
            "https://shop.local".to_string(),
            None,
            payload,
        )
    }

    #[test]
    fn test_lane_index_is_stable_and_in_range() {
        let id = ExecutionId::new("exec-17");
        let first = lane_index(&id, 3);
        for _ in 0..10 {
            assert_eq!(lane_index(&id, 3), first);
        }
        assert!(first < 3);
        assert_eq!(lane_index(&id, 1), 0);
        assert_eq!(lane_index(&id, 0), 0);
    }

    #[tokio::test]
    async fn test_same_execution_is_strictly_ordered() {
        let sink = SlowSink::new(Duration::from_millis(20));
        let metrics = Arc::new(CaptureMetrics::new());
        let pool = LanePool::new(3, 16, sink.clone(), metrics.clone());

        // Later jobs finish compressing first; the lane must still send in order
        pool.dispatch(job("exec-1", "a", Duration::from_millis(60))).await.unwrap();
        pool.dispatch(job("exec-1", "b", Duration::from_millis(30))).await.unwrap();
        pool.dispatch(job("exec-1", "c", Duration::from_millis(0))).await.unwrap();

        let report = pool.drain(Duration::from_secs(5), Duration::from_secs(10)).await;
        assert!(report.is_clean());
        assert_eq!(report.abandoned, 0);

        let log = sink.log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["start:a", "end:a", "start:b", "end:b", "start:c", "end:c"]
        );
        assert_eq!(metrics.snapshot().dispatched, 3);
    }

    #[tokio::test]
    async fn test_drain_times_out_and_counts_abandoned() {
        let sink = SlowSink::new(Duration::from_secs(30));
        let metrics = Arc::new(CaptureMetrics::new());
        let pool = LanePool::new(2, 16, sink, metrics);

        pool.dispatch(job("exec-1", "a", Duration::ZERO)).await.unwrap();
        pool.dispatch(job("exec-1", "b", Duration::ZERO)).await.unwrap();
        pool.dispatch(job("exec-2", "c", Duration::ZERO)).await.unwrap();

        let report = pool
            .drain(Duration::from_millis(100), Duration::from_secs(5))
            .await;
        assert_eq!(report.outcome, DrainOutcome::TimedOut);
        assert_eq!(report.abandoned, 3);
    }

    #[tokio::test]
    async fn test_outer_deadline_bounds_drain() {
        let sink = SlowSink::new(Duration::from_secs(30));
        let metrics = Arc::new(CaptureMetrics::new());
        let pool = LanePool::new(1, 16, sink, metrics);

        pool.dispatch(job("exec-1", "a", Duration::ZERO)).await.unwrap();

        let report = pool
            .drain(Duration::from_secs(60), Duration::from_millis(100))
            .await;
        assert_eq!(report.outcome, DrainOutcome::TimedOut);
        assert_eq!(report.abandoned, 1);
        assert!(report.elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_dispatch_after_drain_is_rejected() {
        let sink = SlowSink::new(Duration::ZERO);
        let metrics = Arc::new(CaptureMetrics::new());
        let pool = LanePool::new(2, 4, sink, metrics);

        let report = pool.drain(Duration::from_secs(1), Duration::from_secs(2)).await;
        assert!(report.is_clean());

        let err = pool
            .dispatch(job("exec-1", "late", Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::ShuttingDown));
        assert_eq!(pool.pending(), 0);
        assert!(pool.stats().iter().all(|lane| !lane.is_running));
    }
}
