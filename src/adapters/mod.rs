//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter      | Implements          | Connects to                    |
//! |--------------|---------------------|--------------------------------|
//! | `nvs`        | StoragePort         | NVS / in-memory store          |
//! |              | ConfigPort          | JSON records in NVS            |
//! | `time`       | Clock               | ESP32 system timer / Instant   |
//! | `device_id`  | (identity)          | eFuse factory MAC              |
//! | `sim_radio`  | Transceiver         | in-memory shared medium (host) |

pub mod device_id;
pub mod nvs;
#[cfg(not(target_os = "espidf"))]
pub mod sim_radio;
pub mod time;
