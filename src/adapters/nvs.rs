//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`] and [`ConfigPort`] for both endpoints.
//!
//! | Namespace      | Keys                  | Owner                          |
//! |----------------|-----------------------|--------------------------------|
//! | `devices`      | `dev_0` .. `dev_19`   | gateway device registry        |
//! | `node_config`  | `nodeId`, `msgCtr`    | node identity                  |
//! | `lorabridge`   | `gw_cfg`, `node_cfg`  | JSON configuration             |
//! | `auth`         | `aes_key`, `aes_iv`   | link key material (hex)        |
//!
//! On ESP32 values are NVS strings; NVS commits are atomic per key.  The
//! host build keeps everything in a map and forgets it on exit.

use log::{info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::{GatewayConfig, KeyMaterial, NodeConfig};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "lorabridge";
const CRED_NAMESPACE: &str = "auth";

pub const KEY_AES_KEY: &str = "aes_key";
pub const KEY_AES_IV: &str = "aes_iv";

/// NVS limits namespace and key names to 15 characters.
const NVS_NAME_MAX: usize = 15;

#[cfg(target_os = "espidf")]
const MAX_STR_SIZE: usize = 1024;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: HashMap<String, String>,
}

impl NvsAdapter {
    /// Initialise NVS flash.  On first boot or after a layout version change
    /// the partition is erased and re-initialised.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK || unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(StorageError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: HashMap::new(),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// NUL-terminated copy of a namespace or key name.
    fn c_name(name: &str) -> Result<[u8; NVS_NAME_MAX + 1], StorageError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > NVS_NAME_MAX || bytes.contains(&0) {
            return Err(StorageError::InvalidKey);
        }
        let mut buf = [0u8; NVS_NAME_MAX + 1];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }

    /// Open an NVS namespace, run `f` with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = Self::c_name(namespace).map_err(|_| ESP_ERR_NVS_INVALID_NAME as i32)?;
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }
        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }
}

impl StoragePort for NvsAdapter {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError> {
        Self::c_name(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            Ok(self.store.get(&Self::composite_key(namespace, key)).cloned())
        }

        #[cfg(target_os = "espidf")]
        {
            let key_buf = Self::c_name(key)?;
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let mut size: usize = 0;
                let ret = unsafe {
                    nvs_get_str(handle, key_buf.as_ptr() as *const _, core::ptr::null_mut(), &mut size)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                if size == 0 || size > MAX_STR_SIZE {
                    return Err(ESP_ERR_NVS_INVALID_LENGTH as i32);
                }
                let mut buf = vec![0u8; size];
                let ret = unsafe {
                    nvs_get_str(handle, key_buf.as_ptr() as *const _, buf.as_mut_ptr() as *mut _, &mut size)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                // Drop the terminating NUL.
                buf.truncate(size.saturating_sub(1));
                Ok(buf)
            });
            match result {
                Ok(bytes) => String::from_utf8(bytes)
                    .map(Some)
                    .map_err(|_| StorageError::IoError),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(None),
                Err(e) => {
                    warn!("NvsAdapter: read {}/{} failed ({})", namespace, key, e);
                    Err(StorageError::IoError)
                }
            }
        }
    }

    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        Self::c_name(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .insert(Self::composite_key(namespace, key), value.to_string());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key_buf = Self::c_name(key)?;
            if value.as_bytes().contains(&0) || value.len() >= MAX_STR_SIZE {
                return Err(StorageError::IoError);
            }
            let mut value_buf = Vec::with_capacity(value.len() + 1);
            value_buf.extend_from_slice(value.as_bytes());
            value_buf.push(0);

            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let ret = unsafe {
                    nvs_set_str(handle, key_buf.as_ptr() as *const _, value_buf.as_ptr() as *const _)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|e| {
                warn!("NvsAdapter: write {}/{} failed ({})", namespace, key, e);
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        Self::c_name(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.store.remove(&Self::composite_key(namespace, key));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key_buf = Self::c_name(key)?;
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let ret = unsafe { nvs_erase_key(handle, key_buf.as_ptr() as *const _) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|_| StorageError::IoError)
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .contains_key(&Self::composite_key(namespace, key))
        }

        #[cfg(target_os = "espidf")]
        {
            let Ok(key_buf) = Self::c_name(key) else {
                return false;
            };
            Self::with_nvs_handle(namespace, false, |handle| {
                let ret = unsafe {
                    nvs_find_key(handle, key_buf.as_ptr() as *const _, core::ptr::null_mut())
                };
                Ok(ret == ESP_OK)
            })
            .unwrap_or(false)
        }
    }
}

// ── Configuration records ─────────────────────────────────────

/// A configuration record stored as JSON under one key.
pub trait StoredConfig: Serialize + DeserializeOwned + Default {
    const KEY: &'static str;
    fn check(&self) -> Result<(), ConfigError>;
}

impl StoredConfig for GatewayConfig {
    const KEY: &'static str = "gw_cfg";
    fn check(&self) -> Result<(), ConfigError> {
        self.validate()
    }
}

impl StoredConfig for NodeConfig {
    const KEY: &'static str = "node_cfg";
    fn check(&self) -> Result<(), ConfigError> {
        self.validate()
    }
}

impl<T: StoredConfig> ConfigPort<T> for NvsAdapter {
    fn load(&self) -> Result<T, ConfigError> {
        match self.get(CONFIG_NAMESPACE, T::KEY)? {
            Some(json) => {
                let cfg: T = serde_json::from_str(&json).map_err(|_| ConfigError::Corrupted)?;
                cfg.check()?;
                info!("NvsAdapter: loaded {} ({} bytes)", T::KEY, json.len());
                Ok(cfg)
            }
            None => {
                info!("NvsAdapter: no stored {}, using defaults", T::KEY);
                Ok(T::default())
            }
        }
    }

    fn save(&mut self, config: &T) -> Result<(), ConfigError> {
        config.check()?;
        let json = serde_json::to_string(config).map_err(|_| ConfigError::Corrupted)?;
        self.put(CONFIG_NAMESPACE, T::KEY, &json)?;
        info!("NvsAdapter: {} saved", T::KEY);
        Ok(())
    }
}

// ── Credential storage ────────────────────────────────────────
//
// The link key lives in the "auth" namespace.  With CONFIG_NVS_ENCRYPTION
// the partition is encrypted transparently; the calls below do not change.
impl NvsAdapter {
    pub fn store_credential(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.put(CRED_NAMESPACE, key, value)
    }

    pub fn read_credential(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.get(CRED_NAMESPACE, key)
    }

    pub fn delete_credential(&mut self, key: &str) -> Result<(), StorageError> {
        self.delete(CRED_NAMESPACE, key)
    }

    pub fn credential_exists(&self, key: &str) -> bool {
        self.exists(CRED_NAMESPACE, key)
    }

    /// Provisioned key/IV, or the deployed static pair when either half is
    /// missing or not 32 hex characters.
    pub fn load_key_material(&self) -> KeyMaterial {
        let half = |name: &str| match self.read_credential(name) {
            Ok(Some(text)) => {
                let parsed = KeyMaterial::parse_hex(&text);
                if parsed.is_none() {
                    warn!("NvsAdapter: credential {} is not 32 hex chars", name);
                }
                parsed
            }
            Ok(None) => None,
            Err(e) => {
                warn!("NvsAdapter: cannot read credential {} ({})", name, e);
                None
            }
        };
        match (half(KEY_AES_KEY), half(KEY_AES_IV)) {
            (Some(key), Some(iv)) => {
                info!("NvsAdapter: using provisioned link key");
                KeyMaterial { key, iv }
            }
            _ => KeyMaterial::default(),
        }
    }
}
