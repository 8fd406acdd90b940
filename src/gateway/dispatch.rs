//! Broker → radio command path.
//!
//! Resolves the device name, seals a `CMD` with a fresh message id and
//! queues it for the radio task with "requires ack" set.  Runs on the
//! broker task; it only touches the registry (for the lookup) and the
//! outbound queue, never the radio.

use core::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::app::commands::CommandRequest;
use crate::app::ports::{Clock, StoragePort};
use crate::bridge::{BridgeQueues, OutboundFrame};
use crate::error::DispatchError;
use crate::protocol::{Codec, Message, MessageId, PhysicalId};
use crate::registry::DeviceRegistry;

pub struct CommandDispatcher<'q, S, C> {
    registry: Arc<DeviceRegistry<S, C>>,
    queues: &'q BridgeQueues,
    codec: Codec,
    last_id: AtomicU16,
}

impl<'q, S: StoragePort, C: Clock> CommandDispatcher<'q, S, C> {
    pub fn new(registry: Arc<DeviceRegistry<S, C>>, queues: &'q BridgeQueues, codec: Codec) -> Self {
        Self {
            registry,
            queues,
            codec,
            last_id: AtomicU16::new(0),
        }
    }

    /// Queue `request` for reliable delivery.  Returns the message id the
    /// eventual `Delivered`/`DeliveryFailed` event will carry.
    pub fn submit(&self, request: &CommandRequest) -> Result<MessageId, DispatchError> {
        let Some(node_id) = self.registry.id_of(&request.device_name) else {
            warn!(
                "Dispatch: unknown device '{}', dropping '{}'",
                request.device_name, request.method
            );
            return Err(DispatchError::UnknownDevice);
        };
        let device_name =
            PhysicalId::try_from(request.device_name.as_str()).map_err(|()| DispatchError::UnknownDevice)?;

        let message_id = next_message_id(&self.last_id);
        let command = Message::Command {
            node_id,
            message_id: Some(message_id),
            method: request.method.clone(),
            params: request.params.clone(),
        };
        let frame = self.codec.seal_message(&command).map_err(DispatchError::Codec)?;

        let queued = self.queues.send_outbound(OutboundFrame {
            node_id,
            device_name,
            message_id,
            frame,
            require_ack: true,
        });
        if !queued {
            return Err(DispatchError::QueueFull);
        }
        info!(
            "Dispatch: '{}' queued for node {} (msgId {})",
            request.method, node_id, message_id
        );
        Ok(message_id)
    }
}

/// Next message id after `last`: wraps, never 0.
fn next_message_id(last: &AtomicU16) -> MessageId {
    loop {
        let id = last.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if id != 0 {
            return id;
        }
    }
}
