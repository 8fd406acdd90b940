//! Gateway side of the link.
//!
//! ```text
//!            ┌──────────────────── radio task ─────────────────────┐
//!  air ⇄ Transceiver ⇄ GatewayServer ── ReliableSender (1 in flight)
//!            │              │
//!            │         DeviceRegistry ◀── CommandDispatcher ◀── broker
//!            │              │                   │
//!            └──────── BridgeQueues ◀───────────┘
//! ```
//!
//! - [`server`]: [`GatewayServer`], the radio-task loop
//! - [`reliable`]: ack/retry state machine for outbound commands
//! - [`dispatch`]: [`CommandDispatcher`], the broker-side entry point

pub mod dispatch;
pub mod reliable;
pub mod server;

pub use dispatch::CommandDispatcher;
pub use reliable::{PendingAck, ReliableSender, RetryAction, SendState};
pub use server::{DropReason, FrameOutcome, GatewayServer, GatewayStatus};
