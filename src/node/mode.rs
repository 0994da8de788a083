// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

/// Global mode of the node.
///
/// Every change is raised on the bus as `ModeChanged` with
/// [`as_byte`](Self::as_byte) as payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SystemMode {
    /// Nothing started yet.
    #[default]
    Init,
    /// Drivers are being initialized.
    Boot,
    /// Drivers run, nothing is forwarded to the broker.
    Offline,
    /// Device state and discovery are forwarded to the broker.
    Online,
}

impl SystemMode {
    /// Returns the wire representation carried by `ModeChanged`.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Boot => 1,
            Self::Offline => 2,
            Self::Online => 3,
        }
    }

    /// Parses the wire representation.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Init),
            1 => Some(Self::Boot),
            2 => Some(Self::Offline),
            3 => Some(Self::Online),
            _ => None,
        }
    }

    /// Returns the mode name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Boot => "boot",
            Self::Offline => "offline",
            Self::Online => "online",
        }
    }
}

impl fmt::Display for SystemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_representation() {
        for mode in [
            SystemMode::Init,
            SystemMode::Boot,
            SystemMode::Offline,
            SystemMode::Online,
        ] {
            assert_eq!(SystemMode::from_byte(mode.as_byte()), Some(mode));
        }
        assert_eq!(SystemMode::from_byte(9), None);
        assert_eq!(SystemMode::Online.to_string(), "online");
    }
}
