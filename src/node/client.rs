//! Node protocol client.
//!
//! ```text
//!            join_interval elapsed            JOIN_ACCEPT{nodeId}
//!  Unjoined ───────────────────────▶ Joining ─────────────────────▶ Joined
//!     ▲       send JOIN_REQUEST         │        reset counter,
//!     │                                 │        persist identity
//!     └─────── accept window expired ───┘
//! ```
//!
//! [`poll`](NodeClient::poll) never blocks longer than one receive window,
//! so the caller's loop can interleave sensor work.  While joined, each
//! poll either sends due periodic telemetry or listens once for commands.
//!
//! The sequence counter is shared by telemetry and acks.  A value is only
//! consumed (and persisted) once its frame actually left the radio.

use log::{debug, info, warn};

use crate::app::ports::{Clock, CommandDisposition, DevicePort, StoragePort, Transceiver, TransportError};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::protocol::{Codec, Message, MessageId, NodeId, PhysicalId};
use crate::radio::start_radio;

/// NVS namespace for the node's own identity.
pub const NODE_NAMESPACE: &str = "node_config";
const KEY_NODE_ID: &str = "nodeId";
const KEY_SEQUENCE: &str = "msgCtr";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unjoined,
    /// JOIN_REQUEST sent; waiting for the accept until `deadline_ms`.
    Joining { deadline_ms: u64 },
    Joined { node_id: NodeId },
}

/// What one [`poll`](NodeClient::poll) did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    JoinRequested,
    Joined(NodeId),
    JoinTimedOut,
    TelemetrySent(u32),
    Command {
        method: String,
        disposition: CommandDisposition,
        acked: bool,
    },
}

pub struct NodeClient<R, S, C, D> {
    radio: R,
    store: S,
    clock: C,
    codec: Codec,
    device: D,
    physical_id: PhysicalId,
    config: NodeConfig,
    state: NodeState,
    sequence: u32,
    last_join_attempt_ms: Option<u64>,
    last_telemetry_ms: Option<u64>,
}

impl<R, S, C, D> NodeClient<R, S, C, D>
where
    R: Transceiver,
    S: StoragePort,
    C: Clock,
    D: DevicePort,
{
    /// Build the client and restore a previously assigned identity.
    pub fn new(
        radio: R,
        store: S,
        clock: C,
        codec: Codec,
        device: D,
        physical_id: PhysicalId,
        config: NodeConfig,
    ) -> Self {
        let node_id: NodeId = load_number(&store, KEY_NODE_ID);
        let sequence: u32 = load_number(&store, KEY_SEQUENCE);
        info!("Node: {} id {} msgCtr {}", physical_id, node_id, sequence);

        let state = if node_id == 0 {
            NodeState::Unjoined
        } else {
            NodeState::Joined { node_id }
        };
        Self {
            radio,
            store,
            clock,
            codec,
            device,
            physical_id,
            config,
            state,
            sequence,
            last_join_attempt_ms: None,
            last_telemetry_ms: None,
        }
    }

    /// Bring the radio up.  Fatal on failure: the device should restart.
    pub fn start(&mut self) -> Result<()> {
        start_radio(&mut self.radio, self.config.frequency_mhz, self.config.radio_init_attempts)
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self.state {
            NodeState::Joined { node_id } => Some(node_id),
            _ => None,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.node_id().is_some()
    }

    /// Last consumed sequence value.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// One step of the state machine.
    pub fn poll(&mut self) -> Option<NodeEvent> {
        let now = self.clock.now_ms();
        match self.state {
            NodeState::Unjoined => {
                let due = self.last_join_attempt_ms.is_none_or(|t| {
                    now.saturating_sub(t) >= u64::from(self.config.join_interval_ms)
                });
                if due {
                    self.last_join_attempt_ms = Some(now);
                    return self.send_join_request(now);
                }
                None
            }
            NodeState::Joining { deadline_ms } => {
                if now >= deadline_ms {
                    info!("Node: no response to JOIN_REQUEST");
                    self.state = NodeState::Unjoined;
                    return Some(NodeEvent::JoinTimedOut);
                }
                let window = (deadline_ms - now).min(u64::from(self.config.listen_timeout_ms));
                self.receive_once(window as u32)
            }
            NodeState::Joined { .. } => {
                if self.telemetry_due(now) {
                    return match self.send_telemetry() {
                        Ok(seq) => Some(NodeEvent::TelemetrySent(seq)),
                        Err(e) => {
                            warn!("Node: periodic telemetry failed ({})", e);
                            None
                        }
                    };
                }
                if self.config.listen_for_commands {
                    return self.receive_once(self.config.listen_timeout_ms);
                }
                None
            }
        }
    }

    fn telemetry_due(&self, now: u64) -> bool {
        let Some(interval) = self.config.telemetry_interval_ms else {
            return false;
        };
        self.last_telemetry_ms
            .is_none_or(|t| now.saturating_sub(t) >= u64::from(interval))
    }

    fn send_join_request(&mut self, now: u64) -> Option<NodeEvent> {
        let request = Message::JoinRequest {
            physical_id: self.physical_id.to_string(),
            device_class: self.device.device_class().into(),
        };
        let frame = match self.codec.seal_message(&request) {
            Ok(f) => f,
            Err(e) => {
                warn!("Node: cannot seal JOIN_REQUEST ({})", e);
                return None;
            }
        };
        info!("Node: sending JOIN_REQUEST");
        if let Err(e) = self.radio.transmit(&frame) {
            warn!("Node: JOIN_REQUEST transmit failed ({})", e);
            return None;
        }
        self.state = NodeState::Joining {
            deadline_ms: now + u64::from(self.config.join_accept_timeout_ms),
        };
        Some(NodeEvent::JoinRequested)
    }

    fn receive_once(&mut self, timeout_ms: u32) -> Option<NodeEvent> {
        match self.radio.receive(timeout_ms) {
            Ok(bytes) => self.handle_inbound(&bytes),
            Err(TransportError::Timeout) => None,
            Err(e) => {
                warn!("Node: receive failed ({})", e);
                None
            }
        }
    }

    /// Act on one received packet.  Anything that does not open cleanly or
    /// is not meant for this node is ignored without reply.
    pub fn handle_inbound(&mut self, bytes: &[u8]) -> Option<NodeEvent> {
        let message = match self.codec.open_wire(bytes) {
            Ok(m) => m,
            Err(e) => {
                debug!("Node: dropped frame ({})", e);
                return None;
            }
        };

        match (self.state, message) {
            (NodeState::Joining { .. }, Message::JoinAccept { node_id }) if node_id > 0 => {
                self.accept_join(node_id);
                Some(NodeEvent::Joined(node_id))
            }
            (
                NodeState::Joined { node_id: mine },
                Message::Command {
                    node_id,
                    message_id,
                    method,
                    params,
                },
            ) if node_id == mine => {
                info!("Node: received CMD '{}'", method);
                let disposition = self.device.apply_command(&method, &params);
                let acked = match (disposition, message_id) {
                    (CommandDisposition::Applied, Some(id)) => match self.send_ack(id) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("Node: ACK for msgId {} failed ({})", id, e);
                            false
                        }
                    },
                    _ => false,
                };
                Some(NodeEvent::Command {
                    method,
                    disposition,
                    acked,
                })
            }
            (_, other) => {
                debug!("Node: ignoring {}", other.kind());
                None
            }
        }
    }

    fn accept_join(&mut self, node_id: NodeId) {
        self.state = NodeState::Joined { node_id };
        self.sequence = 0;
        self.last_telemetry_ms = None;
        self.persist(KEY_NODE_ID, u32::from(node_id));
        self.persist(KEY_SEQUENCE, 0);
        info!("Node: join successful, node id {}", node_id);
    }

    /// Read the device and send one telemetry frame.  Returns the
    /// sequence it carried.
    pub fn send_telemetry(&mut self) -> Result<u32> {
        let node_id = self.node_id().ok_or(Error::NotJoined)?;

        let mut fields = self.device.read_telemetry_fields();
        fields.retain(|name, value| {
            let keep = value.is_finite();
            if !keep {
                warn!("Node: dropping non-finite field '{}'", name);
            }
            keep
        });

        let sequence = self.next_sequence()?;
        let frame = self.codec.seal_message(&Message::Telemetry {
            node_id,
            sequence,
            fields,
        })?;

        info!("Node: sending TELEMETRY (msgCtr {})", sequence);
        self.commit_transmit(&frame, sequence)?;
        self.last_telemetry_ms = Some(self.clock.now_ms());
        Ok(sequence)
    }

    fn send_ack(&mut self, message_id: MessageId) -> Result<()> {
        let node_id = self.node_id().ok_or(Error::NotJoined)?;
        let sequence = self.next_sequence()?;
        let frame = self.codec.seal_message(&Message::Ack {
            node_id,
            message_id,
            sequence,
        })?;
        info!("Node: sending ACK for msgId {}", message_id);
        self.commit_transmit(&frame, sequence)
    }

    fn next_sequence(&mut self) -> Result<u32> {
        match self.sequence.checked_add(1) {
            Some(next) => Ok(next),
            None => {
                // The gateway would reject every further frame; start over.
                warn!("Node: sequence exhausted, re-joining");
                self.reset_identity();
                Err(Error::NotJoined)
            }
        }
    }

    /// Transmit `frame`; only on success does `sequence` become consumed
    /// and persisted.
    fn commit_transmit(&mut self, frame: &[u8], sequence: u32) -> Result<()> {
        self.radio.transmit(frame)?;
        self.sequence = sequence;
        self.persist(KEY_SEQUENCE, sequence);
        Ok(())
    }

    /// Forget the assigned identity and join again.
    pub fn reset_identity(&mut self) {
        self.state = NodeState::Unjoined;
        self.sequence = 0;
        self.last_join_attempt_ms = None;
        for key in [KEY_NODE_ID, KEY_SEQUENCE] {
            if let Err(e) = self.store.delete(NODE_NAMESPACE, key) {
                warn!("Node: cannot erase {} ({})", key, e);
            }
        }
        info!("Node: identity reset");
    }

    fn persist(&mut self, key: &str, value: u32) {
        if let Err(e) = self.store.put(NODE_NAMESPACE, key, &value.to_string()) {
            warn!("Node: cannot persist {} ({})", key, e);
        }
    }
}

/// Read a decimal value from the node namespace; 0 if absent or unreadable.
fn load_number<S: StoragePort, T: core::str::FromStr + Default>(store: &S, key: &str) -> T {
    match store.get(NODE_NAMESPACE, key) {
        Ok(Some(raw)) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Node: stored {} unreadable ('{}'), using 0", key, raw);
            T::default()
        }),
        Ok(None) => T::default(),
        Err(e) => {
            warn!("Node: cannot read {} ({}), using 0", key, e);
            T::default()
        }
    }
}
