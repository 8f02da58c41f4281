/// Installs a fmt subscriber at INFO, or DEBUG when `verbose`.
///
/// Fails when the host process already installed a global subscriber, which
/// callers are free to ignore.
pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_setup_is_rejected() {
        let _ = setup_logging(true);
        assert!(setup_logging(false).is_err());
    }
}
