//! Gateway device registry.
//!
//! Maps physical device identity to a logical node id, tracks liveness and
//! the per-node replay counter.  It is the only state shared between the
//! radio task (join, telemetry) and the broker task (name lookups), so every
//! public operation holds the registry mutex for its whole
//! read-modify-write span, including the flash write in [`register`].
//!
//! ```text
//!  slot:    0      1      2   ...  19
//!  nodeId:  1      2      3   ...  20
//!          ┌────┐┌────┐┌────┐     ┌────┐
//!          │rec ││ -- ││rec │ ... │ -- │   NVS "devices"/"dev_{slot}"
//!          └────┘└────┘└────┘     └────┘     = {"mac": .., "type": ..}
//! ```
//!
//! Only identity is persisted.  Liveness, signal quality and the replay
//! counter live in RAM and restart from zero after a gateway reboot.
//!
//! [`register`]: DeviceRegistry::register

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{Clock, StoragePort};
use crate::config::MAX_DEVICES;
use crate::error::RegistryError;
use crate::protocol::{DeviceClass, NodeId, PhysicalId};

/// NVS namespace holding one key per occupied slot.
pub const DEVICES_NAMESPACE: &str = "devices";

/// One provisioned node.  A slot holding a record is active; an empty
/// slot is free for allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub node_id: NodeId,
    pub physical_id: PhysicalId,
    pub device_class: DeviceClass,
    /// Monotonic ms of the last frame heard; `None` until heard this boot.
    pub last_seen_ms: Option<u64>,
    /// Highest accepted telemetry sequence.
    pub last_sequence: u32,
    pub last_rssi: Option<f32>,
    pub last_snr: Option<f32>,
}

/// Outcome of [`DeviceRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub node_id: NodeId,
    /// `false` when the physical id already held a slot.
    pub is_new: bool,
}

/// Persisted shape of a slot.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    mac: String,
    #[serde(rename = "type")]
    device_class: String,
}

struct Inner<S> {
    store: S,
    slots: [Option<DeviceRecord>; MAX_DEVICES],
}

impl<S> Inner<S> {
    fn find(&self, physical_id: &str) -> Option<&DeviceRecord> {
        self.slots
            .iter()
            .flatten()
            .find(|rec| rec.physical_id.as_str() == physical_id)
    }

    fn get_mut(&mut self, node_id: NodeId) -> Option<&mut DeviceRecord> {
        slot_index(node_id).and_then(|i| self.slots[i].as_mut())
    }

    fn get(&self, node_id: NodeId) -> Option<&DeviceRecord> {
        slot_index(node_id).and_then(|i| self.slots[i].as_ref())
    }
}

/// Slot index for a node id, if it is in `1..=MAX_DEVICES`.
fn slot_index(node_id: NodeId) -> Option<usize> {
    usize::from(node_id)
        .checked_sub(1)
        .filter(|&i| i < MAX_DEVICES)
}

fn slot_key(slot: usize) -> String {
    format!("dev_{}", slot)
}

/// Thread-safe device table backed by a [`StoragePort`].
pub struct DeviceRegistry<S, C> {
    inner: Mutex<Inner<S>>,
    clock: C,
    offline_timeout_ms: u64,
}

impl<S: StoragePort, C: Clock> DeviceRegistry<S, C> {
    /// Create the registry and load every persisted record from `store`.
    pub fn open(store: S, clock: C, offline_timeout_ms: u32) -> Self {
        let mut inner = Inner {
            store,
            slots: core::array::from_fn(|_| None),
        };

        let mut loaded = 0usize;
        for slot in 0..MAX_DEVICES {
            let key = slot_key(slot);
            let raw = match inner.store.get(DEVICES_NAMESPACE, &key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Registry: read {} failed ({}), slot left free", key, e);
                    continue;
                }
            };
            let Some(record) = Self::decode_slot(slot, &raw) else {
                warn!("Registry: {} unreadable ({}), slot left free", key, raw);
                continue;
            };
            if inner.find(&record.physical_id).is_some() {
                warn!(
                    "Registry: {} duplicates {}, ignoring",
                    key, record.physical_id
                );
                continue;
            }
            info!(
                "Registry: loaded slot {} -> node {} ({}, {})",
                slot, record.node_id, record.physical_id, record.device_class
            );
            inner.slots[slot] = Some(record);
            loaded += 1;
        }
        info!("Registry: {} device(s) restored", loaded);

        Self {
            inner: Mutex::new(inner),
            clock,
            offline_timeout_ms: u64::from(offline_timeout_ms),
        }
    }

    fn decode_slot(slot: usize, raw: &str) -> Option<DeviceRecord> {
        let stored: StoredRecord = serde_json::from_str(raw).ok()?;
        if stored.mac.is_empty() {
            return None;
        }
        Some(DeviceRecord {
            node_id: (slot + 1) as NodeId,
            physical_id: PhysicalId::try_from(stored.mac.as_str()).ok()?,
            device_class: DeviceClass::try_from(stored.device_class.as_str()).ok()?,
            last_seen_ms: None,
            last_sequence: 0,
            last_rssi: None,
            last_snr: None,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        // A panic elsewhere never leaves a slot half-written: every
        // mutation is a single assignment after the fallible work.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the node id for `physical_id`, allocating and persisting the
    /// lowest free slot on first sight.
    pub fn register(
        &self,
        physical_id: &str,
        device_class: &str,
    ) -> Result<Registration, RegistryError> {
        if physical_id.is_empty() {
            return Err(RegistryError::InvalidIdentity);
        }
        let physical = PhysicalId::try_from(physical_id).map_err(|()| RegistryError::InvalidIdentity)?;
        let class = DeviceClass::try_from(device_class).map_err(|()| RegistryError::InvalidIdentity)?;

        let mut inner = self.lock();
        if let Some(existing) = inner.find(physical_id) {
            debug!("Registry: {} already node {}", physical_id, existing.node_id);
            return Ok(Registration {
                node_id: existing.node_id,
                is_new: false,
            });
        }

        let Some(slot) = inner.slots.iter().position(Option::is_none) else {
            warn!("Registry: full, cannot register {}", physical_id);
            return Err(RegistryError::Full);
        };

        let stored = StoredRecord {
            mac: physical_id.into(),
            device_class: device_class.into(),
        };
        let json = serde_json::to_string(&stored).map_err(|_| RegistryError::InvalidIdentity)?;
        if let Err(e) = inner.store.put(DEVICES_NAMESPACE, &slot_key(slot), &json) {
            warn!("Registry: persist slot {} failed ({}), not registering", slot, e);
            return Err(RegistryError::Storage(e));
        }

        let node_id = (slot + 1) as NodeId;
        inner.slots[slot] = Some(DeviceRecord {
            node_id,
            physical_id: physical,
            device_class: class,
            last_seen_ms: Some(self.clock.now_ms()),
            last_sequence: 0,
            last_rssi: None,
            last_snr: None,
        });
        info!(
            "Registry: registered {} ({}) as node {}",
            physical_id, device_class, node_id
        );
        Ok(Registration {
            node_id,
            is_new: true,
        })
    }

    pub fn is_registered(&self, node_id: NodeId) -> bool {
        self.lock().get(node_id).is_some()
    }

    /// Accept `sequence` iff it is strictly greater than the last accepted
    /// one for `node_id`, advancing the counter to it.  Gaps are fine.
    pub fn check_sequence(&self, node_id: NodeId, sequence: u32) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.get_mut(node_id) else {
            return false;
        };
        if sequence <= record.last_sequence {
            warn!(
                "Registry: node {} sequence regression (got {}, last {})",
                node_id, sequence, record.last_sequence
            );
            return false;
        }
        record.last_sequence = sequence;
        true
    }

    /// Restart the replay window, e.g. when a node re-joins with a
    /// freshly reset counter.
    pub fn reset_sequence(&self, node_id: NodeId) {
        if let Some(record) = self.lock().get_mut(node_id) {
            record.last_sequence = 0;
        }
    }

    /// Record that `node_id` was just heard.  Not persisted.
    pub fn touch(&self, node_id: NodeId, rssi: f32, snr: f32) {
        let now = self.clock.now_ms();
        if let Some(record) = self.lock().get_mut(node_id) {
            record.last_seen_ms = Some(now);
            record.last_rssi = Some(rssi);
            record.last_snr = Some(snr);
        }
    }

    /// Active devices heard within the offline timeout.
    pub fn online_count(&self) -> usize {
        let now = self.clock.now_ms();
        self.lock()
            .slots
            .iter()
            .flatten()
            .filter(|rec| {
                rec.last_seen_ms
                    .is_some_and(|seen| now.saturating_sub(seen) < self.offline_timeout_ms)
            })
            .count()
    }

    /// Physical id of `node_id`, `None` if not active.
    pub fn name_of(&self, node_id: NodeId) -> Option<PhysicalId> {
        self.lock().get(node_id).map(|rec| rec.physical_id.clone())
    }

    /// Node id of `physical_id`, `None` if not active.
    pub fn id_of(&self, physical_id: &str) -> Option<NodeId> {
        self.lock().find(physical_id).map(|rec| rec.node_id)
    }

    /// Every active physical id, in slot order.
    pub fn active_names(&self) -> Vec<PhysicalId> {
        self.lock()
            .slots
            .iter()
            .flatten()
            .map(|rec| rec.physical_id.clone())
            .collect()
    }

    /// Snapshot of one record.
    pub fn record(&self, node_id: NodeId) -> Option<DeviceRecord> {
        self.lock().get(node_id).cloned()
    }

    /// Number of active records.
    pub fn len(&self) -> usize {
        self.lock().slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Administrative removal: erase the stored record and free the slot.
    pub fn remove(&self, node_id: NodeId) -> Result<DeviceRecord, RegistryError> {
        let slot = slot_index(node_id).ok_or(RegistryError::UnknownNode)?;
        let mut inner = self.lock();
        if inner.slots[slot].is_none() {
            return Err(RegistryError::UnknownNode);
        }
        inner
            .store
            .delete(DEVICES_NAMESPACE, &slot_key(slot))
            .map_err(RegistryError::Storage)?;
        let record = inner.slots[slot].take().ok_or(RegistryError::UnknownNode)?;
        info!("Registry: removed node {} ({})", node_id, record.physical_id);
        Ok(record)
    }

    /// Tear down and hand back the store.
    pub fn into_store(self) -> S {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .store
    }
}
