use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::discovery::EntityKind;
use crate::dispatch::{Handler, HandlerError};
use crate::mqtt::message_manager::InboundMessage;
use crate::persistence::{ConfigStore, EntityState};
use crate::refresh::RefreshSender;

const EVENT_TYPE: &str = "event";

/// Queues a state refresh for thermostats that reported an event.
///
/// Thermostat events carry only the changed property; the refresh fetches the full
/// state so set-point and regime stay in sync.
pub struct EntityStateHandler {
    store: Arc<ConfigStore>,
    refresh: RefreshSender,
}

impl EntityStateHandler {
    pub fn new(store: Arc<ConfigStore>, refresh: RefreshSender) -> Self {
        Self { store, refresh }
    }
}

#[async_trait]
impl Handler for EntityStateHandler {
    fn name(&self) -> &str {
        "entity_state"
    }

    async fn process(&self, msg: &InboundMessage) -> Result<(), HandlerError> {
        let state: EntityState =
            serde_json::from_slice(&msg.payload).map_err(|e| HandlerError::payload(msg, e))?;

        if state.kind != EVENT_TYPE {
            trace!("State {} of {} needs no refresh", state.kind, state.id);
            return Ok(());
        }

        let Some(entity) = self.store.find_entity_by_id(&state.id).await? else {
            debug!("Event for unknown entity {}", state.id);
            return Ok(());
        };

        if entity.kind.parse::<EntityKind>().ok() != Some(EntityKind::Thermo) {
            return Ok(());
        }

        debug!("Thermostat {} changed, queueing refresh", state.id);
        self.refresh.enqueue(state.id)?;
        Ok(())
    }
}
