use crate::CaptureError;
use std::time::Duration;
use url::Url;

/// Shortens `input` to at most `max_width` characters, ending with `...`
/// when anything was cut.
pub fn abbreviate(input: &str, max_width: usize) -> String {
    const MARKER: &str = "...";

    if input.chars().count() <= max_width {
        return input.to_string();
    }

    if max_width <= MARKER.len() {
        return input.chars().take(max_width).collect();
    }

    let mut shortened: String = input.chars().take(max_width - MARKER.len()).collect();
    shortened.push_str(MARKER);
    shortened
}

/// Name of this host as reported to the capture service.
pub fn local_node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| crate::NOT_APPLICABLE.to_string())
}

/// Human readable duration used in drain and compression logs.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, secs % 3600 / 60, secs % 60) {
        (0, 0, 0) => format!("{}ms", duration.as_millis()),
        (0, 0, s) => format!("{s}.{}s", duration.subsec_millis() / 100),
        (0, m, s) => format!("{m}m {s}s"),
        (h, m, s) => format!("{h}h {m}m {s}s"),
    }
}

/// Binary-prefixed size of a screenshot payload.
pub fn format_bytes(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    let units = ["KB", "MB", "GB", "TB"];

    if (bytes as f64) < KIB {
        return format!("{bytes} B");
    }

    let mut size = bytes as f64 / KIB;
    let mut unit = units[0];
    for next in &units[1..] {
        if size < KIB {
            break;
        }
        size /= KIB;
        unit = next;
    }
    format!("{size:.2} {unit}")
}

/// Parses the capture service base URL, accepting only http and https.
pub fn validate_url(url: &str) -> Result<Url, CaptureError> {
    let parsed = Url::parse(url)
        .map_err(|e| CaptureError::Configuration(format!("Invalid capture URL {url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(CaptureError::Configuration(format!(
            "Capture URL {url} uses unsupported scheme '{scheme}', expected http or https"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate("short", 42), "short");
        assert_eq!(abbreviate("abcdefghij", 8), "abcde...");
        assert_eq!(abbreviate("abcdefghij", 10), "abcdefghij");
        assert_eq!(abbreviate("abcdefghij", 2), "ab");
        assert_eq!(abbreviate("ééééé", 4), "é...");
    }

    #[test]
    fn test_local_node_name_not_empty() {
        assert!(!local_node_name().is_empty());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(format_duration(Duration::from_millis(2480)), "2.4s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://capture.local").is_ok());
        assert!(validate_url("http://capture.local:8080/api").is_ok());
        assert!(validate_url("invalid-url").is_err());

        let err = validate_url("ftp://capture.local").unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(ref msg) if msg.contains("'ftp'")));
        assert!(!err.to_string().contains("port"));
    }
}
