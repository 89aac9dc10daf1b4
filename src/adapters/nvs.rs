//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`ConfigPort`] for the agent configuration, and keeps the
//! Wi-Fi credentials in their own namespace.
//!
//! # Security
//!
//! - Config validation: every field is range-checked before persistence.
//! - Encrypted NVS: on ESP32, the "auth" namespace lives on the encrypted
//!   NVS partition. The simulation backend uses plaintext (dev/test only).
//! - Atomic writes: ESP-IDF NVS commits are atomic per nvs_commit().

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::AgentConfig;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "otabridge";
const CONFIG_KEY: &str = "agentcfg";
const CRED_NAMESPACE: &str = "auth";

/// Largest blob read back from NVS.
const MAX_BLOB_SIZE: usize = 1024;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: HashMap<String, Vec<u8>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is
    /// erased and re-initialised automatically.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called from the main task before any other NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK || unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
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

    /// Null-terminated copy of an NVS name (max 15 chars).
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let len = name.len().min(15);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        buf
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = Self::c_name(namespace);
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

    // ── Raw blobs ─────────────────────────────────────────────

    /// Read a blob. `Ok(None)` when the key does not exist.
    fn read_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        {
            Ok(self.store.get(&Self::composite_key(namespace, key)).cloned())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let mut size: usize = 0;
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr() as *const _, core::ptr::null_mut(), &mut size)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                if size == 0 || size > MAX_BLOB_SIZE {
                    return Err(ESP_ERR_NVS_INVALID_LENGTH);
                }
                let mut buf = vec![0u8; size];
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr() as *const _, buf.as_mut_ptr() as *mut _, &mut size)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(buf)
            });
            match result {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(None),
                Err(e) => {
                    warn!("NvsAdapter: NVS read error {}", e);
                    Err(ConfigError::IoError)
                }
            }
        }
    }

    fn write_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(ConfigError::IoError);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.store.insert(Self::composite_key(namespace, key), data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let ret = unsafe {
                    nvs_set_blob(handle, key.as_ptr() as *const _, data.as_ptr() as *const _, data.len())
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
                warn!("NvsAdapter: NVS write error {}", e);
                ConfigError::IoError
            })
        }
    }

    // ── Credentials ───────────────────────────────────────────

    /// Store a credential in the encrypted "auth" namespace.
    pub fn store_credential(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.write_blob(CRED_NAMESPACE, key, value.as_bytes())
    }

    /// Read a credential from the encrypted "auth" namespace.
    pub fn read_credential(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.read_blob(CRED_NAMESPACE, key)? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|_| ConfigError::Corrupted),
            None => Ok(None),
        }
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<AgentConfig, ConfigError> {
        let Some(bytes) = self.read_blob(CONFIG_NAMESPACE, CONFIG_KEY)? else {
            info!("NvsAdapter: no stored config, using defaults");
            return Ok(AgentConfig::default());
        };
        let config: AgentConfig = postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
        config.validate().map_err(|msg| {
            warn!("NvsAdapter: stored config invalid: {}", msg);
            ConfigError::ValidationFailed(msg)
        })?;
        info!("NvsAdapter: loaded config ({} bytes)", bytes.len());
        Ok(config)
    }

    fn save(&mut self, config: &AgentConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::ValidationFailed)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.write_blob(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)?;
        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}
