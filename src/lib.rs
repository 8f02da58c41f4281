//! # Evidence Capture
//!
//! Asynchronous screenshot evidence for UI tests. Every interaction (click,
//! navigation, script execution, text entry) and the end of each test produce
//! a screenshot that is compressed and delivered to a remote capture service
//! without holding up the test and without ever failing it.
//!
//! ## Pipeline
//!
//! | Stage | Runs on | Failure handling |
//! |-------|---------|------------------|
//! | **Registration** | caller, once per test | capture disabled for that test |
//! | **Acquisition** | caller, per event | event skipped |
//! | **Compression** | bounded pool (default 4) | original bytes sent |
//! | **Dispatch** | serial lanes (default 3) | logged, not retried |
//! | **Drain** | shutdown | abandoned jobs counted |
//!
//! ### Ordering
//! Jobs are assigned to lanes by a hash of their execution id. A lane sends
//! one job at a time in submission order, so the screenshots of one test
//! arrive in the order they were taken. Different tests proceed in parallel.
//!
//! ### Terminal screenshots
//! The first pass, fail or skip screenshot of an execution closes it; later
//! events for that execution are dropped.
//!
//! ## Configuration
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `CAPTURE_URL` | base URL of the capture service | unset |
//! | `SUT_NAME` | system under test | unset |
//! | `SUT_VERSION` | version under test | unset |
//! | `THREADS` | compression workers | 4 |
//! | `CAPTURE_THREADS` | dispatch lanes | 3 |
//!
//! Capture is active only when the URL, name and version are all set.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use evidence_capture::{CaptureConfig, CapturePipeline, CaptureRequest, TerminalState};
//!
//! # async fn run(page: chromiumoxide::Page) -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = CapturePipeline::from_config(CaptureConfig::from_env()?).await?;
//! let _signal = pipeline.drain_on_signal();
//!
//! let execution = pipeline.register("search_test").await;
//! execution.on_event(CaptureRequest::click("css=#search"), &page).await;
//! execution.on_event(CaptureRequest::terminal(TerminalState::Pass), &page).await;
//!
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// Configuration and settings for the capture pipeline
pub mod config;

/// Error types and fail-open helpers
pub mod error;

/// Capture requests, terminal states and wire messages
pub mod model;

/// HTTP client for the capture service
pub mod client;

/// Registration of test runs
pub mod registry;

/// Screenshot acquisition from browser sessions
pub mod acquirer;

/// Palette reduction and the compression pool
pub mod compression;

/// Serial dispatch lanes
pub mod dispatch;

/// At-most-once terminal screenshot latch
pub mod guard;

/// Main capture pipeline
pub mod pipeline;

/// Drain reports and shutdown signal handling
pub mod shutdown;

/// Pipeline counters
pub mod telemetry;

/// Logging setup
pub mod logging;

/// Utility functions and helpers
pub mod utils;


pub use acquirer::*;
pub use client::*;
pub use compression::*;
pub use config::*;
pub use dispatch::*;
pub use error::*;
pub use guard::*;
pub use logging::*;
pub use model::*;
pub use pipeline::*;
pub use registry::*;
pub use shutdown::*;
pub use telemetry::*;
pub use utils::*;
