use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};

const EVENTS: &str = "capture_events_total";
const SKIPPED_UNREGISTERED: &str = "capture_skipped_unregistered_total";
const SKIPPED_AFTER_TERMINAL: &str = "capture_skipped_after_terminal_total";
const IGNORED_SCRIPTS: &str = "capture_ignored_scripts_total";
const REGISTRATION_FAILURES: &str = "capture_registration_failures_total";
const ACQUISITION_FAILURES: &str = "capture_acquisition_failures_total";
const COMPRESSION_FALLBACKS: &str = "capture_compression_fallbacks_total";
const DISPATCHED: &str = "capture_screenshots_sent_total";
const DISPATCH_FAILURES: &str = "capture_dispatch_failures_total";
const REJECTED: &str = "capture_rejected_total";
const ABANDONED: &str = "capture_abandoned_total";

/// Pipeline counters.
///
/// Kept locally for [`PipelineStats`] snapshots and mirrored to whatever
/// `metrics` recorder the host process installed.
#[derive(Debug, Default)]
pub struct CaptureMetrics {
    events: AtomicU64,
    skipped_unregistered: AtomicU64,
    skipped_after_terminal: AtomicU64,
    ignored_scripts: AtomicU64,
    registration_failures: AtomicU64,
    acquisition_failures: AtomicU64,
    compression_fallbacks: AtomicU64,
    dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self) {
        bump(&self.events, EVENTS, 1);
    }

    pub fn record_skipped_unregistered(&self) {
        bump(&self.skipped_unregistered, SKIPPED_UNREGISTERED, 1);
    }

    pub fn record_skipped_after_terminal(&self) {
        bump(&self.skipped_after_terminal, SKIPPED_AFTER_TERMINAL, 1);
    }

    pub fn record_ignored_script(&self) {
        bump(&self.ignored_scripts, IGNORED_SCRIPTS, 1);
    }

    pub fn record_registration_failure(&self) {
        bump(&self.registration_failures, REGISTRATION_FAILURES, 1);
    }

    pub fn record_acquisition_failure(&self) {
        bump(&self.acquisition_failures, ACQUISITION_FAILURES, 1);
    }

    pub fn record_compression_fallback(&self) {
        bump(&self.compression_fallbacks, COMPRESSION_FALLBACKS, 1);
    }

    pub fn record_dispatch(&self, success: bool) {
        if success {
            bump(&self.dispatched, DISPATCHED, 1);
        } else {
            bump(&self.dispatch_failures, DISPATCH_FAILURES, 1);
        }
    }

    pub fn record_rejected(&self) {
        bump(&self.rejected, REJECTED, 1);
    }

    pub fn record_abandoned(&self, jobs: usize) {
        bump(&self.abandoned, ABANDONED, jobs as u64);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            events: self.events.load(Ordering::Relaxed),
            skipped_unregistered: self.skipped_unregistered.load(Ordering::Relaxed),
            skipped_after_terminal: self.skipped_after_terminal.load(Ordering::Relaxed),
            ignored_scripts: self.ignored_scripts.load(Ordering::Relaxed),
            registration_failures: self.registration_failures.load(Ordering::Relaxed),
            acquisition_failures: self.acquisition_failures.load(Ordering::Relaxed),
            compression_fallbacks: self.compression_fallbacks.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

fn bump(local: &AtomicU64, name: &'static str, by: u64) {
    local.fetch_add(by, Ordering::Relaxed);
    counter!(name, by);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub events: u64,
    pub skipped_unregistered: u64,
    pub skipped_after_terminal: u64,
    pub ignored_scripts: u64,
    pub registration_failures: u64,
    pub acquisition_failures: u64,
    pub compression_fallbacks: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub rejected: u64,
    pub abandoned: u64,
}
