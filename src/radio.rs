//! Radio task plumbing: receive-interrupt notification and boot bring-up.
//!
//! ```text
//!  DIO1 ISR ──notify()──▶ RadioIrq ──wait_timeout(50 ms)──▶ radio task
//!                          (Signal)                          receive()
//! ```
//!
//! The ISR only raises a flag.  The radio task waits on it with a bounded
//! timeout so it can still service retries and the outbound queue when
//! nothing arrives.

use core::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{error, info, warn};

use crate::app::ports::Transceiver;
use crate::error::{Error, Result};

/// "Packet received" notification from interrupt context.
pub struct RadioIrq {
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl Default for RadioIrq {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioIrq {
    pub const fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }

    /// ISR-safe: never blocks, coalesces repeated notifications.
    pub fn notify(&self) {
        self.signal.signal(());
    }

    /// Consume a pending notification without waiting.
    pub fn take(&self) -> bool {
        self.signal.try_take().is_some()
    }

    /// Block until notified or `timeout` elapses.  `true` if notified.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        future::block_on(future::or(
            async {
                self.signal.wait().await;
                true
            },
            async {
                async_io_mini::Timer::after(timeout).await;
                false
            },
        ))
    }
}

/// Bring the radio up, retrying `attempts` times.  Failure is the one
/// unconditionally fatal condition: nothing works without the link.
pub fn start_radio<R: Transceiver>(radio: &mut R, frequency_mhz: f32, attempts: u8) -> Result<()> {
    for attempt in 1..=attempts.max(1) {
        match radio.begin(frequency_mhz) {
            Ok(()) => {
                info!("LoRa: radio up at {:.1} MHz (attempt {})", frequency_mhz, attempt);
                return Ok(());
            }
            Err(e) => warn!("LoRa: begin failed ({}), attempt {}/{}", e, attempt, attempts),
        }
    }
    error!("LoRa: radio did not start after {} attempts", attempts);
    Err(Error::Init("radio"))
}
