use crate::{local_node_name, CaptureClient, CaptureError, CreateExecution, ExecutionId};
use std::sync::Arc;
use tracing::debug;

/// Registers test runs with the capture service.
#[derive(Clone)]
pub struct ExecutionRegistry {
    client: Arc<dyn CaptureClient>,
    node: String,
}

impl ExecutionRegistry {
    pub fn new(client: Arc<dyn CaptureClient>) -> Self {
        Self::with_node(client, local_node_name())
    }

    pub fn with_node(client: Arc<dyn CaptureClient>, node: impl Into<String>) -> Self {
        Self {
            client,
            node: node.into(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Performs the single registration call for `test_id`.
    pub async fn register(&self, test_id: &str) -> Result<ExecutionId, CaptureError> {
        if test_id.trim().is_empty() {
            return Err(CaptureError::InvalidTestId);
        }

        debug!("About to initialise capture execution for {}", test_id);
        let message = CreateExecution {
            test_id: test_id.to_string(),
            node: self.node.clone(),
        };

        let id = self.client.create_execution(&message).await?;
        debug!("Capture executionID={} for {}", id, test_id);
        Ok(id)
    }
}
