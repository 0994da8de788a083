// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent settings.
//!
//! Two kinds of documents are persisted through a [`SettingsStore`]:
//!
//! - the node settings ([`NodeSettings`]): identity and broker parameters,
//!   tagged with a magic value so an incompatible document is detected and
//!   replaced with defaults;
//! - one opaque config blob per driver, keyed by driver name.
//!
//! [`FileStore`] keeps them as JSON files under a directory, [`MemoryStore`]
//! keeps them in memory.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Tag identifying the current node settings layout.
pub const SETTINGS_MAGIC: u32 = 0xC0DE_0004;

/// Largest driver config blob accepted, in bytes.
pub const MAX_CONFIG_SIZE: usize = 4096;

/// Storage backend for settings.
pub trait SettingsStore: Send + Sync {
    /// Loads the config blob of a driver, `None` if never saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn load_driver_config(&self, driver: &str) -> Result<Option<Vec<u8>>, SettingsError>;

    /// Saves the config blob of a driver.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::TooLarge`] for blobs over
    /// [`MAX_CONFIG_SIZE`], or an error if the backend cannot be written.
    fn save_driver_config(&self, driver: &str, config: &[u8]) -> Result<(), SettingsError>;

    /// Loads the raw node settings document, `None` if never saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn load_node_settings(&self) -> Result<Option<Vec<u8>>, SettingsError>;

    /// Saves the raw node settings document.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn save_node_settings(&self, document: &[u8]) -> Result<(), SettingsError>;
}

fn check_config_size(config: &[u8]) -> Result<(), SettingsError> {
    if config.len() > MAX_CONFIG_SIZE {
        return Err(SettingsError::TooLarge {
            size: config.len(),
            max: MAX_CONFIG_SIZE,
        });
    }
    Ok(())
}

/// Broker connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Username, if the broker requires authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
}

impl MqttSettings {
    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            keep_alive_secs: 30,
        }
    }
}

/// Persisted node settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Layout tag, see [`SETTINGS_MAGIC`].
    pub magic: u32,
    /// Immutable system identifier.
    pub system_id: String,
    /// Node name, used as topic prefix.
    pub node_name: String,
    /// Broker parameters.
    pub mqtt: MqttSettings,
}

impl NodeSettings {
    /// Creates default settings for a system id. The node name defaults to
    /// the system id.
    #[must_use]
    pub fn defaults(system_id: impl Into<String>) -> Self {
        let system_id = system_id.into();
        Self {
            magic: SETTINGS_MAGIC,
            node_name: system_id.clone(),
            system_id,
            mqtt: MqttSettings::default(),
        }
    }

    /// Loads the settings, resetting them to defaults if they are absent,
    /// unreadable or tagged with another magic value.
    ///
    /// A reset keeps the system id of the previous document when one can be
    /// recovered, otherwise a new one is generated. The reset settings are
    /// saved before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn load_or_reset(store: &dyn SettingsStore) -> Result<Self, SettingsError> {
        let previous = store.load_node_settings()?;

        let system_id = match &previous {
            None => {
                tracing::info!("No node settings found, using defaults");
                None
            }
            Some(bytes) => match serde_json::from_slice::<Self>(bytes) {
                Ok(settings) if settings.magic == SETTINGS_MAGIC => {
                    tracing::info!(node = %settings.node_name, "Loaded node settings");
                    return Ok(settings);
                }
                Ok(settings) => {
                    tracing::warn!(
                        magic = format_args!("{:#010x}", settings.magic),
                        expected = format_args!("{SETTINGS_MAGIC:#010x}"),
                        "Invalid settings magic"
                    );
                    Some(settings.system_id)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to parse node settings");
                    recover_system_id(bytes)
                }
            },
        };

        let system_id = system_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        tracing::warn!(system_id = %system_id, "Resetting node settings to defaults");
        let settings = Self::defaults(system_id);
        settings.save(store)?;
        Ok(settings)
    }

    /// Saves the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn save(&self, store: &dyn SettingsStore) -> Result<(), SettingsError> {
        let document = serde_json::to_vec_pretty(self)?;
        store.save_node_settings(&document)
    }
}

/// Digs the system id out of a document that no longer parses as settings.
fn recover_system_id(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    value.get("system_id")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_are_created() {
        let store = MemoryStore::new();
        let settings = NodeSettings::load_or_reset(&store).unwrap();

        assert_eq!(settings.magic, SETTINGS_MAGIC);
        assert_eq!(settings.node_name, settings.system_id);
        assert_eq!(settings.system_id.len(), 32);
        assert!(store.load_node_settings().unwrap().is_some());

        let again = NodeSettings::load_or_reset(&store).unwrap();
        assert_eq!(again, settings);
    }

    #[test]
    fn wrong_magic_resets_but_keeps_system_id() {
        let store = MemoryStore::new();
        let mut stale = NodeSettings::defaults("abc123");
        stale.magic = 0xC0DE_0003;
        stale.node_name = "renamed".to_string();
        stale.save(&store).unwrap();

        let settings = NodeSettings::load_or_reset(&store).unwrap();
        assert_eq!(settings.magic, SETTINGS_MAGIC);
        assert_eq!(settings.system_id, "abc123");
        assert_eq!(settings.node_name, "abc123");
    }

    #[test]
    fn garbage_resets() {
        let store = MemoryStore::new();
        store.save_node_settings(b"\x00\x01garbage").unwrap();
        let settings = NodeSettings::load_or_reset(&store).unwrap();
        assert_eq!(settings.magic, SETTINGS_MAGIC);
        assert!(!settings.system_id.is_empty());

        store
            .save_node_settings(br#"{"system_id": "kept", "magic": "nope"}"#)
            .unwrap();
        let settings = NodeSettings::load_or_reset(&store).unwrap();
        assert_eq!(settings.system_id, "kept");
    }

    #[test]
    fn custom_settings_survive() {
        let store = MemoryStore::new();
        let mut settings = NodeSettings::defaults("id");
        settings.node_name = "greenhouse".to_string();
        settings.mqtt.username = Some("node".to_string());
        settings.save(&store).unwrap();

        let loaded = NodeSettings::load_or_reset(&store).unwrap();
        assert_eq!(loaded.node_name, "greenhouse");
        assert_eq!(loaded.mqtt.username.as_deref(), Some("node"));
        assert_eq!(loaded.mqtt.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn oversized_config_rejected() {
        let blob = vec![b' '; MAX_CONFIG_SIZE + 1];
        assert!(matches!(
            check_config_size(&blob),
            Err(SettingsError::TooLarge { .. })
        ));
        assert!(check_config_size(&blob[..MAX_CONFIG_SIZE]).is_ok());
    }
}
