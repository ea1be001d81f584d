use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use super::Handler;
use crate::mqtt::message_manager::InboundMessage;
use crate::mqtt::topic;

struct Route {
    pattern: String,
    handler: Arc<dyn Handler>,
}

/// Ordered list of (pattern, handler) routes.
#[derive(Default)]
pub struct Dispatcher {
    routes: Vec<Route>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pattern: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        let pattern = pattern.into();
        debug!("Registering handler {} on {}", handler.name(), pattern);
        self.routes.push(Route { pattern, handler });
        self
    }

    /// Distinct registered patterns in registration order, used for subscribing.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = Vec::new();
        for route in &self.routes {
            if !patterns.contains(&route.pattern) {
                patterns.push(route.pattern.clone());
            }
        }
        patterns
    }

    /// Runs every matching handler in registration order.
    ///
    /// Returns how many handlers ran. Empty payloads are skipped.
    pub async fn process(&self, msg: &InboundMessage) -> usize {
        if msg.is_empty() {
            trace!("Skipping empty message on {}", msg.topic);
            return 0;
        }

        let mut ran = 0;
        for route in &self.routes {
            if !topic::matches(&msg.topic, &route.pattern) {
                continue;
            }

            ran += 1;
            if let Err(e) = route.handler.process(msg).await {
                error!("Handler {} failed on {}: {}", route.handler.name(), msg.topic, e);
            }
        }

        if ran == 0 {
            trace!("No handler for {}", msg);
        }
        ran
    }

    /// Processes messages until the sending side is dropped.
    pub async fn run(self, mut receiver: mpsc::Receiver<InboundMessage>) {
        info!("Dispatcher running with {} routes", self.routes.len());
        while let Some(msg) = receiver.recv().await {
            self.process(&msg).await;
        }
        info!("Message channel closed, dispatcher stopped");
    }
}
