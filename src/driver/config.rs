// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver configuration documents.
//!
//! Configs are JSON objects. Accessors never fail: a missing field yields the
//! caller's default, a field of the wrong type yields the default and logs a
//! warning naming the driver and the field.

use serde_json::{Map, Value};

/// Number of usable GPIO pins on the target board.
pub const GPIO_COUNT: i64 = 49;

/// Parsed JSON configuration of one driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    driver: String,
    document: Value,
}

impl DriverConfig {
    /// Parses `bytes`, falling back to `default` and then to an empty object.
    ///
    /// Empty input uses the default silently; unparseable input logs a
    /// warning first. A non-object document counts as unparseable.
    #[must_use]
    pub fn parse(driver: &str, bytes: &[u8], default: Option<&str>) -> Self {
        let parsed = if bytes.is_empty() {
            None
        } else {
            match serde_json::from_slice::<Value>(bytes) {
                Ok(value) if value.is_object() => Some(value),
                Ok(_) => {
                    tracing::warn!(driver = %driver, "Config is not a JSON object, using default");
                    None
                }
                Err(e) => {
                    tracing::warn!(driver = %driver, error = %e, "Invalid config, using default");
                    None
                }
            }
        };

        let document = parsed
            .or_else(|| {
                let literal = default?;
                match serde_json::from_str::<Value>(literal) {
                    Ok(value) if value.is_object() => Some(value),
                    _ => {
                        tracing::warn!(driver = %driver, "Default config is invalid, using empty config");
                        None
                    }
                }
            })
            .unwrap_or_else(|| Value::Object(Map::new()));

        Self {
            driver: driver.to_string(),
            document,
        }
    }

    /// Creates an empty config.
    #[must_use]
    pub fn empty(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            document: Value::Object(Map::new()),
        }
    }

    /// Returns the underlying JSON document.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.document
    }

    /// Serializes the document as compact JSON.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        self.document.to_string()
    }

    fn field(&self, key: &str) -> Option<&Value> {
        let value = self.document.get(key);
        if value.is_none() {
            tracing::debug!(driver = %self.driver, field = key, "Config field absent, using default");
        }
        value
    }

    fn mismatch(&self, key: &str, expected: &str) {
        tracing::warn!(
            driver = %self.driver,
            field = key,
            expected,
            "Config field has wrong type, using default"
        );
    }

    /// Reads an integer field.
    #[must_use]
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.field(key) {
            None => default,
            Some(value) => value.as_i64().unwrap_or_else(|| {
                self.mismatch(key, "integer");
                default
            }),
        }
    }

    /// Reads a floating point field. Integers are accepted.
    #[must_use]
    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        match self.field(key) {
            None => default,
            Some(value) => value.as_f64().unwrap_or_else(|| {
                self.mismatch(key, "number");
                default
            }),
        }
    }

    /// Reads a boolean field.
    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.field(key) {
            None => default,
            Some(value) => value.as_bool().unwrap_or_else(|| {
                self.mismatch(key, "boolean");
                default
            }),
        }
    }

    /// Reads a GPIO pin number.
    ///
    /// Negative values and pins beyond [`GPIO_COUNT`] yield the default.
    #[must_use]
    pub fn get_gpio(&self, key: &str, default: Option<u8>) -> Option<u8> {
        let Some(value) = self.field(key) else {
            return default;
        };
        match value.as_i64() {
            Some(pin) if (0..GPIO_COUNT).contains(&pin) => u8::try_from(pin).ok(),
            Some(pin) => {
                tracing::warn!(driver = %self.driver, field = key, pin, "Invalid GPIO pin, using default");
                default
            }
            None => {
                self.mismatch(key, "integer");
                default
            }
        }
    }

    /// Reads a string field.
    #[must_use]
    pub fn get_str(&self, key: &str, default: &str) -> String {
        match self.field(key) {
            None => default.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                self.mismatch(key, "string");
                default.to_string()
            }
        }
    }

    /// Reads an array field. Absent or mismatched fields yield an empty slice.
    #[must_use]
    pub fn get_array(&self, key: &str) -> &[Value] {
        match self.field(key) {
            None => &[],
            Some(Value::Array(items)) => items,
            Some(_) => {
                self.mismatch(key, "array");
                &[]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_config() {
        let config = DriverConfig::parse("d", br#"{"period": 500}"#, Some(r#"{"period": 1}"#));
        assert_eq!(config.get_int("period", 0), 500);
    }

    #[test]
    fn empty_input_uses_default() {
        let config = DriverConfig::parse("d", b"", Some(r#"{"period": 1000}"#));
        assert_eq!(config.get_int("period", 0), 1000);
    }

    #[test]
    fn garbage_uses_default() {
        let config = DriverConfig::parse("d", b"{not json", Some(r#"{"period": 1000}"#));
        assert_eq!(config.get_int("period", 0), 1000);

        let config = DriverConfig::parse("d", b"[1, 2]", Some(r#"{"period": 7}"#));
        assert_eq!(config.get_int("period", 0), 7);
    }

    #[test]
    fn invalid_default_yields_empty_object() {
        let config = DriverConfig::parse("d", b"", Some("nope"));
        assert_eq!(config.as_value(), &Value::Object(Map::new()));

        let config = DriverConfig::parse("d", b"", None);
        assert_eq!(config.to_json_string(), "{}");
    }

    #[test]
    fn accessors_degrade_to_defaults() {
        let config = DriverConfig::parse(
            "d",
            br#"{"n": "five", "f": 2, "b": 1, "s": 3, "a": {}}"#,
            None,
        );
        assert_eq!(config.get_int("n", 5), 5);
        assert!((config.get_float("f", 0.0) - 2.0).abs() < f64::EPSILON);
        assert!(config.get_bool("b", true));
        assert_eq!(config.get_str("s", "x"), "x");
        assert!(config.get_array("a").is_empty());
        assert_eq!(config.get_int("missing", 9), 9);
    }

    #[test]
    fn gpio_bounds() {
        let config = DriverConfig::parse(
            "d",
            br#"{"ok": 21, "neg": -1, "high": 49, "edge": 48, "str": "4"}"#,
            None,
        );
        assert_eq!(config.get_gpio("ok", None), Some(21));
        assert_eq!(config.get_gpio("edge", None), Some(48));
        assert_eq!(config.get_gpio("neg", None), None);
        assert_eq!(config.get_gpio("high", Some(2)), Some(2));
        assert_eq!(config.get_gpio("str", None), None);
        assert_eq!(config.get_gpio("missing", Some(5)), Some(5));
    }

    #[test]
    fn strings_and_arrays() {
        let config = DriverConfig::parse("d", br#"{"name": "pump", "pins": [1, 2]}"#, None);
        assert_eq!(config.get_str("name", ""), "pump");
        assert_eq!(config.get_array("pins").len(), 2);
    }
}
