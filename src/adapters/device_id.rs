//! Physical device identity derived from the factory MAC address.
//!
//! The MAC is burned into eFuse, so the identity is stable across reboots
//! and re-flashes.  It is sent in every JOIN_REQUEST as
//! `"AA:BB:CC:DD:EE:FF"` and names the device on the broker.

use core::fmt::Write;

use crate::protocol::PhysicalId;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: a fixed locally-administered MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0x02, 0x4C, 0x42, 0x00, 0x00, 0x01]
}

/// Colon-separated uppercase hex, e.g. `DE:AD:BE:EF:CA:FE`.
pub fn physical_id(mac: &MacAddress) -> PhysicalId {
    let mut id = PhysicalId::new();
    // 17 chars always fit.
    let _ = write!(
        id,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
    id
}
