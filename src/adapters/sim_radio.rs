//! In-memory radio medium for the host simulation.
//!
//! ```text
//!   SimRadio(0) ──transmit──▶ SimAir ──▶ inbox(1) ──hook()──▶ endpoint 1
//!                               │
//!                               └─────▶ inbox(2) ──hook()──▶ endpoint 2
//! ```
//!
//! Every transmitted frame is copied into the inbox of every other
//! attached endpoint that has started its radio.  There is no airtime,
//! collision or range model.  A full inbox drops its oldest frame, like a
//! receiver that was not read in time.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::app::ports::{Transceiver, TransportError};
use crate::config::MAX_FRAME_SIZE;
use crate::protocol::FrameBuf;

/// Frames buffered per endpoint.
const INBOX_DEPTH: usize = 16;

struct Received {
    frame: FrameBuf,
    rssi: f32,
    snr: f32,
}

#[derive(Default)]
struct Endpoint {
    inbox: VecDeque<Received>,
    hook: Option<fn()>,
    started: bool,
}

/// Shared broadcast medium.
#[derive(Default)]
pub struct SimAir {
    endpoints: Mutex<Vec<Endpoint>>,
    arrived: Condvar,
}

impl SimAir {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new transceiver to the medium.
    pub fn attach(self: &Arc<Self>) -> SimRadio {
        let mut endpoints = self.lock();
        endpoints.push(Endpoint::default());
        let id = endpoints.len() - 1;
        SimRadio {
            air: Arc::clone(self),
            id,
            last_rssi: 0.0,
            last_snr: 0.0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Endpoint>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self, from: usize, frame: FrameBuf) {
        let mut hooks: Vec<fn()> = Vec::new();
        {
            let mut endpoints = self.lock();
            for (id, ep) in endpoints.iter_mut().enumerate() {
                if id == from || !ep.started {
                    continue;
                }
                if ep.inbox.len() == INBOX_DEPTH {
                    warn!("SimAir: inbox {} full, oldest frame lost", id);
                    ep.inbox.pop_front();
                }
                // Farther endpoints hear a weaker signal.
                let distance = from.abs_diff(id) as f32;
                ep.inbox.push_back(Received {
                    frame: frame.clone(),
                    rssi: -55.0 - 8.0 * distance,
                    snr: 10.0 - 1.5 * distance,
                });
                if let Some(hook) = ep.hook {
                    hooks.push(hook);
                }
            }
        }
        self.arrived.notify_all();
        // Outside the lock: a hook may be a receive-interrupt stand-in that
        // wakes another thread.
        for hook in hooks {
            hook();
        }
    }
}

/// One endpoint on a [`SimAir`].
pub struct SimRadio {
    air: Arc<SimAir>,
    id: usize,
    last_rssi: f32,
    last_snr: f32,
}

impl SimRadio {
    pub fn endpoint_id(&self) -> usize {
        self.id
    }

    /// Frames waiting in this endpoint's inbox.
    pub fn pending(&self) -> usize {
        self.air.lock()[self.id].inbox.len()
    }
}

impl Transceiver for SimRadio {
    fn begin(&mut self, frequency_mhz: f32) -> Result<(), TransportError> {
        if !frequency_mhz.is_finite() || frequency_mhz <= 0.0 {
            return Err(TransportError::InitFailed(-2));
        }
        self.air.lock()[self.id].started = true;
        debug!("SimRadio {}: up at {:.1} MHz", self.id, frequency_mhz);
        Ok(())
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.air.lock()[self.id].started {
            return Err(TransportError::TxFailed(-1));
        }
        if data.len() > MAX_FRAME_SIZE {
            return Err(TransportError::Oversize);
        }
        let frame = FrameBuf::from_slice(data).map_err(|_| TransportError::Oversize)?;
        self.air.broadcast(self.id, frame);
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<FrameBuf, TransportError> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut endpoints = self.air.lock();
        loop {
            if let Some(rx) = endpoints[self.id].inbox.pop_front() {
                self.last_rssi = rx.rssi;
                self.last_snr = rx.snr;
                return Ok(rx.frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            endpoints = self
                .air
                .arrived
                .wait_timeout(endpoints, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn start_receive(&mut self) -> Result<(), TransportError> {
        if !self.air.lock()[self.id].started {
            return Err(TransportError::RxFailed(-1));
        }
        Ok(())
    }

    fn last_rssi(&self) -> f32 {
        self.last_rssi
    }

    fn last_snr(&self) -> f32 {
        self.last_snr
    }

    fn set_receive_hook(&mut self, hook: fn()) {
        self.air.lock()[self.id].hook = Some(hook);
    }
}
