use async_trait::async_trait;
use tracing::debug;

use crate::dispatch::{Handler, HandlerError};
use crate::mqtt::message_manager::InboundMessage;

/// Logs every gateway message under the `qbha::capture` target.
#[derive(Debug, Default)]
pub struct CaptureHandler;

impl CaptureHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for CaptureHandler {
    fn name(&self) -> &str {
        "capture"
    }

    async fn process(&self, msg: &InboundMessage) -> Result<(), HandlerError> {
        debug!(target: "qbha::capture", "{}", msg.render());
        Ok(())
    }
}
