// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Volatile settings store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{SettingsStore, check_config_size};
use crate::error::SettingsError;

#[derive(Debug, Default)]
struct Documents {
    node: Option<Vec<u8>>,
    drivers: HashMap<String, Vec<u8>>,
}

/// Settings kept in memory. Clones share the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<RwLock<Documents>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the names of every driver with a saved config.
    #[must_use]
    pub fn driver_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.documents.read().drivers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl SettingsStore for MemoryStore {
    fn load_driver_config(&self, driver: &str) -> Result<Option<Vec<u8>>, SettingsError> {
        Ok(self.documents.read().drivers.get(driver).cloned())
    }

    fn save_driver_config(&self, driver: &str, config: &[u8]) -> Result<(), SettingsError> {
        check_config_size(config)?;
        self.documents
            .write()
            .drivers
            .insert(driver.to_string(), config.to_vec());
        Ok(())
    }

    fn load_node_settings(&self) -> Result<Option<Vec<u8>>, SettingsError> {
        Ok(self.documents.read().node.clone())
    }

    fn save_node_settings(&self, document: &[u8]) -> Result<(), SettingsError> {
        self.documents.write().node = Some(document.to_vec());
        Ok(())
    }
}
