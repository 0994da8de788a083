// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Settings kept as files under a directory.
//!
//! ```text
//! <root>/
//! ├── node.json
//! └── drivers/
//!     ├── uptime.json
//!     └── relays.json
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{SettingsStore, check_config_size};
use crate::error::SettingsError;

const NODE_FILE: &str = "node.json";
const DRIVERS_DIR: &str = "drivers";

/// File-backed settings store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens the store, creating the directory layout if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let root = root.into();
        fs::create_dir_all(root.join(DRIVERS_DIR))?;
        tracing::info!(root = %root.display(), "Opened settings store");
        Ok(Self { root })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn driver_path(&self, driver: &str) -> Result<PathBuf, SettingsError> {
        let valid = !driver.is_empty()
            && driver
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !driver.starts_with('.');
        if !valid {
            return Err(SettingsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid driver name {driver:?}"),
            )));
        }
        Ok(self.root.join(DRIVERS_DIR).join(format!("{driver}.json")))
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, SettingsError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl SettingsStore for FileStore {
    fn load_driver_config(&self, driver: &str) -> Result<Option<Vec<u8>>, SettingsError> {
        read_optional(&self.driver_path(driver)?)
    }

    fn save_driver_config(&self, driver: &str, config: &[u8]) -> Result<(), SettingsError> {
        check_config_size(config)?;
        let path = self.driver_path(driver)?;
        fs::write(&path, config)?;
        tracing::debug!(driver = %driver, path = %path.display(), "Saved driver config");
        Ok(())
    }

    fn load_node_settings(&self) -> Result<Option<Vec<u8>>, SettingsError> {
        read_optional(&self.root.join(NODE_FILE))
    }

    fn save_node_settings(&self, document: &[u8]) -> Result<(), SettingsError> {
        let path = self.root.join(NODE_FILE);
        fs::write(&path, document)?;
        tracing::info!(path = %path.display(), "Saved node settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::settings::NodeSettings;

    static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn scratch_dir() -> PathBuf {
        let n = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("iot_node_settings_{}_{n}", std::process::id()))
    }

    #[test]
    fn creates_layout_and_round_trips() {
        let dir = scratch_dir();
        let store = FileStore::open(&dir).unwrap();
        assert!(dir.join("drivers").is_dir());

        assert!(store.load_driver_config("relays").unwrap().is_none());
        store.save_driver_config("relays", br#"{"count": 4}"#).unwrap();
        assert_eq!(
            store.load_driver_config("relays").unwrap(),
            Some(br#"{"count": 4}"#.to_vec())
        );
        assert!(dir.join("drivers/relays.json").is_file());

        let settings = NodeSettings::load_or_reset(&store).unwrap();
        let reopened = FileStore::open(&dir).unwrap();
        assert_eq!(NodeSettings::load_or_reset(&reopened).unwrap(), settings);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn rejects_path_like_names() {
        let dir = scratch_dir();
        let store = FileStore::open(&dir).unwrap();
        assert!(store.save_driver_config("../evil", b"{}").is_err());
        assert!(store.load_driver_config("a/b").is_err());
        assert!(store.load_driver_config("").is_err());
        fs::remove_dir_all(dir).unwrap();
    }
}
