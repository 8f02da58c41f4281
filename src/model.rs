//! Values flowing through the pipeline and the JSON messages sent to the
//! capture service.

use crate::abbreviate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder used for locator or detail when an event has none.
pub const NOT_APPLICABLE: &str = "n/a";

/// Maximum length of a script shown as the detail of a `script` event.
pub const SCRIPT_DETAIL_WIDTH: usize = 42;

/// Identifier handed out by the capture service for one test run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Final outcome of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    Pass,
    Fail,
    Skip,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Pass => "pass",
            TerminalState::Fail => "fail",
            TerminalState::Skip => "skip",
        }
    }

    /// Returns the terminal state named by `action`, if it is one.
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "pass" => Some(TerminalState::Pass),
            "fail" => Some(TerminalState::Fail),
            "skip" => Some(TerminalState::Skip),
            _ => None,
        }
    }
}

/// One evidence event, e.g. a click or the end of a test.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub action: String,
    pub locator: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl CaptureRequest {
    pub fn new(
        action: impl Into<String>,
        locator: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            locator: locator.into(),
            detail: detail.into(),
            created_at: Utc::now(),
        }
    }

    /// Click on the element found by `locator`.
    pub fn click(locator: impl Into<String>) -> Self {
        Self::new("click", locator, NOT_APPLICABLE)
    }

    /// Keys were sent to an element.
    pub fn change() -> Self {
        Self::new("change", NOT_APPLICABLE, NOT_APPLICABLE)
    }

    /// Navigation to `url`.
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new("nav", "url", url)
    }

    /// Execution of a script; the source is abbreviated for display.
    pub fn script(source: &str) -> Self {
        Self::new(
            "script",
            NOT_APPLICABLE,
            abbreviate(source, SCRIPT_DETAIL_WIDTH),
        )
    }

    pub fn terminal(state: TerminalState) -> Self {
        Self::new(state.as_str(), NOT_APPLICABLE, NOT_APPLICABLE)
    }

    pub fn terminal_state(&self) -> Option<TerminalState> {
        TerminalState::from_action(&self.action)
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_state().is_some()
    }
}

/// Formats an error and its chain of sources as sent in `errorMessage`.
pub fn describe_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str("\nCaused by: ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Body of `POST /executions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateExecution {
    #[serde(rename = "testID")]
    pub test_id: String,
    pub node: String,
}

/// Body of `POST /screenshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateScreenshot {
    #[serde(rename = "executionID")]
    pub execution_id: ExecutionId,
    pub action: String,
    pub locator: String,
    pub detail: String,
    pub url: String,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    #[serde(rename = "imageBase64")]
    pub image_base64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_membership() {
        assert_eq!(TerminalState::from_action("pass"), Some(TerminalState::Pass));
        assert_eq!(TerminalState::from_action("fail"), Some(TerminalState::Fail));
        assert_eq!(TerminalState::from_action("skip"), Some(TerminalState::Skip));
        assert_eq!(TerminalState::from_action("click"), None);
        assert_eq!(TerminalState::from_action("PASS"), None);
    }

    #[test]
    fn test_standard_requests() {
        let nav = CaptureRequest::navigate("https://shop.local/cart");
        assert_eq!(nav.action, "nav");
        assert_eq!(nav.locator, "url");
        assert_eq!(nav.detail, "https://shop.local/cart");
        assert!(!nav.is_terminal());

        let change = CaptureRequest::change();
        assert_eq!(change.locator, NOT_APPLICABLE);

        let fail = CaptureRequest::terminal(TerminalState::Fail);
        assert_eq!(fail.action, "fail");
        assert_eq!(fail.terminal_state(), Some(TerminalState::Fail));
    }

    #[test]
    fn test_script_detail_is_abbreviated() {
        let source = "return document.querySelectorAll('li.product-card').length > 0;";
        let request = CaptureRequest::script(source);
        assert_eq!(request.detail.chars().count(), SCRIPT_DETAIL_WIDTH);
        assert!(request.detail.ends_with("..."));

        let short = CaptureRequest::script("return 1;");
        assert_eq!(short.detail, "return 1;");
    }

    #[test]
    fn test_describe_error_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "element detached");
        let outer = crate::CaptureError::from(inner);
        assert_eq!(
            describe_error(&outer),
            "IO error: element detached"
        );

        #[derive(Debug)]
        struct Wrapper(std::io::Error);
        impl fmt::Display for Wrapper {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("assertion failed")
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let wrapped = Wrapper(std::io::Error::new(std::io::ErrorKind::Other, "timeout"));
        assert_eq!(
            describe_error(&wrapped),
            "assertion failed\nCaused by: timeout"
        );
    }

    #[test]
    fn test_screenshot_wire_format() {
        let message = CreateScreenshot {
            execution_id: ExecutionId::new("exec-1"),
            action: "click".to_string(),
            locator: "css=#buy".to_string(),
            detail: NOT_APPLICABLE.to_string(),
            url: "https://shop.local".to_string(),
            error_message: None,
            image_base64: "aGk=".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["executionID"], "exec-1");
        assert_eq!(json["imageBase64"], "aGk=");
        assert!(json.get("errorMessage").is_none());

        let execution = CreateExecution {
            test_id: "checkout_test".to_string(),
            node: "ci-7".to_string(),
        };
        let json = serde_json::to_value(&execution).unwrap();
        assert_eq!(json["testID"], "checkout_test");
        assert_eq!(json["node"], "ci-7");
    }
}
