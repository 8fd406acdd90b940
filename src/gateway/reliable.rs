//! Reliable-send state machine for the single in-flight acknowledged command.
//!
//! ```text
//!            begin()                    on_ack(match)
//!   Idle ─────────────▶ AwaitingAck ─────────────────▶ Idle  (Delivered)
//!                        │    ▲
//!             timeout,   │    │ retransmit identical frame
//!             retries    └────┘
//!             left
//!                        │ timeout, budget spent
//!                        └───────────────────────────▶ Idle  (GaveUp)
//! ```

use log::{info, warn};

use crate::protocol::{FrameBuf, MessageId, NodeId, PhysicalId};

/// A sealed command waiting for its ack.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAck {
    pub node_id: NodeId,
    pub device_name: PhysicalId,
    pub message_id: MessageId,
    /// Exact bytes sent; retransmissions reuse them unchanged.
    pub frame: FrameBuf,
    pub sent_at_ms: u64,
    pub retries: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendState {
    Idle,
    AwaitingAck(PendingAck),
}

/// What the radio task should do after [`ReliableSender::poll`].
#[derive(Debug, PartialEq)]
pub enum RetryAction<'a> {
    /// Nothing pending, or the ack window is still open.
    Wait,
    /// Send these bytes again.
    Retransmit(&'a [u8]),
    /// Retry budget spent; the pending send was dropped.
    GaveUp(PendingAck),
}

pub struct ReliableSender {
    state: SendState,
    ack_timeout_ms: u64,
    max_retries: u8,
}

impl ReliableSender {
    pub fn new(ack_timeout_ms: u32, max_retries: u8) -> Self {
        Self {
            state: SendState::Idle,
            ack_timeout_ms: u64::from(ack_timeout_ms),
            max_retries,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, SendState::Idle)
    }

    pub fn state(&self) -> &SendState {
        &self.state
    }

    /// Arm the ack timer for a frame that was just transmitted.
    pub fn begin(&mut self, pending: PendingAck) {
        if let SendState::AwaitingAck(prev) = &self.state {
            warn!(
                "LoRa TX: msgId {} replaced while awaiting ack for msgId {}",
                pending.message_id, prev.message_id
            );
        }
        self.state = SendState::AwaitingAck(pending);
    }

    /// Match an inbound ack.  Returns the resolved send on a hit; an ack
    /// for another node or message id leaves the state untouched.
    pub fn on_ack(&mut self, node_id: NodeId, message_id: MessageId) -> Option<PendingAck> {
        match &self.state {
            SendState::AwaitingAck(p) if p.node_id == node_id && p.message_id == message_id => {}
            _ => return None,
        }
        match core::mem::replace(&mut self.state, SendState::Idle) {
            SendState::AwaitingAck(p) => {
                info!("LoRa RX: ACK for msgId {} from node {}", message_id, node_id);
                Some(p)
            }
            SendState::Idle => None,
        }
    }

    /// Check the ack timer at `now_ms`.
    pub fn poll(&mut self, now_ms: u64) -> RetryAction<'_> {
        let SendState::AwaitingAck(pending) = &mut self.state else {
            return RetryAction::Wait;
        };
        if now_ms.saturating_sub(pending.sent_at_ms) <= self.ack_timeout_ms {
            return RetryAction::Wait;
        }

        if pending.retries < self.max_retries {
            pending.retries += 1;
            pending.sent_at_ms = now_ms;
            warn!(
                "LoRa TX: ACK timeout for msgId {}, retry {}/{}",
                pending.message_id, pending.retries, self.max_retries
            );
            // Reborrow immutably for the returned slice.
            let SendState::AwaitingAck(pending) = &self.state else {
                return RetryAction::Wait;
            };
            return RetryAction::Retransmit(&pending.frame);
        }

        match core::mem::replace(&mut self.state, SendState::Idle) {
            SendState::AwaitingAck(p) => {
                warn!(
                    "LoRa TX: msgId {} to {} failed after {} retries",
                    p.message_id, p.device_name, p.retries
                );
                RetryAction::GaveUp(p)
            }
            SendState::Idle => RetryAction::Wait,
        }
    }
}
