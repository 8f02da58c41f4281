use std::time::Duration;
use tracing::info;

/// Result of draining the dispatch lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every lane finished its backlog in time.
    Clean,
    /// A lane or the overall deadline ran out; remaining jobs were abandoned.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    /// Jobs queued or in flight when their lane was stopped.
    pub abandoned: usize,
    pub elapsed: Duration,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.outcome == DrainOutcome::Clean
    }
}

/// Waits for SIGINT or SIGTERM (Ctrl-C outside Unix).
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_is_clean() {
        let clean = DrainReport {
            outcome: DrainOutcome::Clean,
            abandoned: 0,
            elapsed: Duration::from_millis(5),
        };
        assert!(clean.is_clean());

        let timed_out = DrainReport {
            outcome: DrainOutcome::TimedOut,
            abandoned: 2,
            ..clean
        };
        assert!(!timed_out.is_clean());
    }
}
