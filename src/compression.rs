//! Palette reduction and base64 encoding of screenshots
//!
//! Screenshots are shrunk with an external palette-reduction tool when one is
//! installed. Every failure degrades to encoding the original bytes, so
//! [`Compressor::compress`] always yields a usable payload.

use crate::{format_bytes, CaptureError, CaptureMetrics, CompressorSettings};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const PROBE_ARG: &str = "-version";

/// Encodes screenshots, reducing their palette first when possible.
#[derive(Debug, Clone)]
pub struct Compressor {
    settings: CompressorSettings,
    available: bool,
}

impl Compressor {
    pub fn new(settings: CompressorSettings, available: bool) -> Self {
        Self {
            settings,
            available,
        }
    }

    /// Probes for the tool once and remembers the answer.
    pub async fn detect(settings: CompressorSettings) -> Self {
        let available = Self::probe(&settings.program).await;
        if available {
            info!("Palette reduction enabled using {}", settings.program);
        } else {
            info!(
                "{} not available, screenshots will be sent uncompressed",
                settings.program
            );
        }
        Self::new(settings, available)
    }

    /// Compressor that always encodes the original bytes.
    pub fn disabled() -> Self {
        Self::new(CompressorSettings::default(), false)
    }

    pub async fn probe(program: &str) -> bool {
        let status = Command::new(program)
            .arg(PROBE_ARG)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        matches!(status, Ok(s) if s.success())
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Base64 payload for `raw`; never fails.
    ///
    /// Returns whether the palette was reduced alongside the payload.
    pub async fn compress(&self, raw: &[u8]) -> (String, bool) {
        if !self.available {
            return (BASE64.encode(raw), false);
        }

        match self.reduce_palette(raw).await {
            Ok(reduced) => {
                debug!(
                    "Reduced screenshot from {} to {}",
                    format_bytes(raw.len()),
                    format_bytes(reduced.len())
                );
                (BASE64.encode(reduced), true)
            }
            Err(e) => {
                warn!("Failed to reduce palette size of screenshot: {}", e);
                (BASE64.encode(raw), false)
            }
        }
    }

    /// Temp files live in guards, so both are removed on every return path.
    async fn reduce_palette(&self, raw: &[u8]) -> Result<Vec<u8>, CaptureError> {
        let input = self.temp_file()?;
        let output = self.temp_file()?;

        tokio::fs::write(input.path(), raw).await?;

        let mut child = Command::new(&self.settings.program)
            .arg(input.path())
            .arg("+dither")
            .arg("-colors")
            .arg(self.settings.palette_colors.to_string())
            .arg(output.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::CompressionFailed(e.to_string()))?;

        let waited = timeout(self.settings.timeout, child.wait()).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(CaptureError::CompressionTimeout(self.settings.timeout));
            }
        };

        if !status.success() {
            return Err(CaptureError::CompressionFailed(format!(
                "{} exited with {}",
                self.settings.program, status
            )));
        }

        let reduced = tokio::fs::read(output.path()).await?;
        if reduced.is_empty() {
            return Err(CaptureError::CompressionFailed(
                "Compressor produced no output".to_string(),
            ));
        }

        Ok(reduced)
    }

    fn temp_file(&self) -> Result<tempfile::NamedTempFile, CaptureError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("screenshot").suffix(".png");
        let file = match &self.settings.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }
}

/// Resolves to the base64 payload of one screenshot.
pub type PendingPayload = JoinHandle<String>;

/// Bounded pool running compression jobs, shared by all executions.
#[derive(Clone)]
pub struct CompressionPool {
    compressor: Arc<Compressor>,
    permits: Arc<Semaphore>,
    metrics: Arc<CaptureMetrics>,
}

impl CompressionPool {
    pub fn new(compressor: Compressor, workers: usize, metrics: Arc<CaptureMetrics>) -> Self {
        Self {
            compressor: Arc::new(compressor),
            permits: Arc::new(Semaphore::new(workers)),
            metrics,
        }
    }

    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    /// Schedules compression of `raw` and returns immediately.
    pub fn submit(&self, raw: Vec<u8>) -> PendingPayload {
        let compressor = self.compressor.clone();
        let permits = self.permits.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            // The semaphore is never closed, so acquiring only waits
            let _permit = permits.acquire_owned().await.ok();
            let (payload, reduced) = compressor.compress(&raw).await;
            if compressor.is_available() && !reduced {
                metrics.record_compression_fallback();
            }
            payload
        })
    }

    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings_in(dir: &std::path::Path, program: &str) -> CompressorSettings {
        CompressorSettings {
            program: program.to_string(),
            timeout: Duration::from_secs(5),
            temp_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    fn dir_is_empty(dir: &std::path::Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_unavailable_encodes_original() {
        let raw = b"\x89PNG raw screenshot bytes".to_vec();
        let (payload, reduced) = Compressor::disabled().compress(&raw).await;
        assert!(!reduced);
        assert_eq!(BASE64.decode(payload).unwrap(), raw);
    }

    #[tokio::test]
    async fn test_probe_missing_program() {
        assert!(!Compressor::probe("definitely-not-a-palette-tool-1f3a").await);

        let dir = tempfile::tempdir().unwrap();
        let compressor =
            Compressor::detect(settings_in(dir.path(), "definitely-not-a-palette-tool-1f3a"))
                .await;
        assert!(!compressor.is_available());
    }

    #[tokio::test]
    async fn test_failing_tool_falls_back_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let compressor = Compressor::new(settings_in(dir.path(), "false"), true);

        let raw = vec![7u8; 256];
        let (payload, reduced) = compressor.compress(&raw).await;
        assert!(!reduced);
        assert_eq!(BASE64.decode(payload).unwrap(), raw);
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_missing_tool_marked_available_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let compressor =
            Compressor::new(settings_in(dir.path(), "definitely-not-a-palette-tool-1f3a"), true);

        let raw = vec![1u8, 2, 3];
        let (payload, _) = compressor.compress(&raw).await;
        assert_eq!(BASE64.decode(payload).unwrap(), raw);
        assert!(dir_is_empty(dir.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reduced_output_is_encoded() {
        use std::os::unix::fs::PermissionsExt;

        let tools = tempfile::tempdir().unwrap();
        let script = tools.path().join("fake-convert");
        // Arguments: <in> +dither -colors <n> <out>
        std::fs::write(&script, "#!/bin/sh\nprintf 'reduced:%s' \"$4\" > \"$5\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let work = tempfile::tempdir().unwrap();
        let compressor =
            Compressor::new(settings_in(work.path(), script.to_str().unwrap()), true);

        let (payload, reduced) = compressor.compress(&[0u8; 64]).await;
        assert!(reduced);
        assert_eq!(BASE64.decode(payload).unwrap(), b"reduced:128");
        assert!(dir_is_empty(work.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_tool_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let tools = tempfile::tempdir().unwrap();
        let script = tools.path().join("slow-convert");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let work = tempfile::tempdir().unwrap();
        let settings = CompressorSettings {
            timeout: Duration::from_millis(100),
            ..settings_in(work.path(), script.to_str().unwrap())
        };
        let compressor = Compressor::new(settings, true);

        let raw = vec![9u8; 32];
        let (payload, reduced) = compressor.compress(&raw).await;
        assert!(!reduced);
        assert_eq!(BASE64.decode(payload).unwrap(), raw);
        assert!(dir_is_empty(work.path()));
    }

    #[tokio::test]
    async fn test_pool_counts_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(CaptureMetrics::new());
        let pool = CompressionPool::new(
            Compressor::new(settings_in(dir.path(), "false"), true),
            2,
            metrics.clone(),
        );

        let payloads = futures::future::join_all(vec![
            pool.submit(vec![1]),
            pool.submit(vec![2]),
            pool.submit(vec![3]),
        ])
        .await;

        assert!(payloads.iter().all(|p| p.is_ok()));
        assert_eq!(metrics.snapshot().compression_fallbacks, 3);
        assert_eq!(pool.available_workers(), 2);
    }
}
