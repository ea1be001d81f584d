use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::request_config;
use crate::dispatch::{Handler, HandlerError};
use crate::mqtt::message_manager::{InboundMessage, Publisher};
use crate::persistence::GatewayState;

pub struct GatewayStateHandler {
    publisher: Arc<dyn Publisher>,
}

impl GatewayStateHandler {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Handler for GatewayStateHandler {
    fn name(&self) -> &str {
        "gateway_state"
    }

    async fn process(&self, msg: &InboundMessage) -> Result<(), HandlerError> {
        let state: GatewayState =
            serde_json::from_slice(&msg.payload).map_err(|e| HandlerError::payload(msg, e))?;

        if !state.online {
            warn!(
                "Gateway offline: {}",
                state.reason.as_deref().unwrap_or("no reason given")
            );
            return Ok(());
        }

        info!("Gateway online, requesting topology");
        request_config(self.publisher.as_ref())?;
        Ok(())
    }
}
