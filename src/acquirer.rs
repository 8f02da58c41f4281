//! Screenshot acquisition from a live browser session

use crate::CaptureError;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};

/// Browser session a screenshot is taken from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// PNG bytes of the current viewport.
    async fn screenshot_png(&self) -> Result<Vec<u8>, CaptureError>;

    /// URL the session currently shows.
    async fn current_url(&self) -> Result<String, CaptureError>;
}

#[async_trait]
impl BrowserSession for Page {
    async fn screenshot_png(&self) -> Result<Vec<u8>, CaptureError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();

        self.screenshot(params)
            .await
            .map_err(|e| CaptureError::AcquisitionFailed(e.to_string()))
    }

    async fn current_url(&self) -> Result<String, CaptureError> {
        self.url()
            .await
            .map(|url| url.unwrap_or_default())
            .map_err(|e| CaptureError::AcquisitionFailed(e.to_string()))
    }
}

/// Raw screenshot together with the page it shows.
#[derive(Debug, Clone)]
pub struct AcquiredImage {
    pub bytes: Vec<u8>,
    pub url: String,
}

/// Takes the screenshot and reads the URL, in that order.
pub async fn acquire(session: &dyn BrowserSession) -> Result<AcquiredImage, CaptureError> {
    let bytes = session.screenshot_png().await?;
    if bytes.is_empty() {
        return Err(CaptureError::AcquisitionFailed(
            "Browser returned an empty screenshot".to_string(),
        ));
    }
    let url = session.current_url().await?;
    Ok(AcquiredImage { bytes, url })
}
