//! Pod configuration.
//!
//! A pod's config is a map from namespace key to device spec. `Reset`
//! validates the whole map, overlays one device per entry, and persists
//! the config JSON alongside the pod row so a reopened system rebuilds
//! the same surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What kind of device sits behind a namespace key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSpec {
    /// Append-only text sink.
    Console,
    /// A mutable cell over the namespace entry of the same key.
    Cell,
    /// An authenticated UDP endpoint with a derived identity.
    Network { key_index: u32 },
    /// Monotonic-rising wall clock.
    Wallclock,
    /// Cryptographic random bits.
    Random,
}

/// A pod's device map. Empty is valid: a pod with no devices is pure
/// storage plus evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodConfig {
    pub devices: BTreeMap<String, DeviceSpec>,
}

impl PodConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, spec: DeviceSpec) -> Self {
        self.devices.insert(key.to_owned(), spec);
        self
    }

    /// Reject configs no reset should ever apply.
    pub fn validate(&self) -> Result<()> {
        for key in self.devices.keys() {
            if key.is_empty() {
                return Err(Error::InvalidConfig("empty device key".into()));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("config maps always serialize")
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let cfg = PodConfig::new()
            .with("console", DeviceSpec::Console)
            .with("state", DeviceSpec::Cell)
            .with("net", DeviceSpec::Network { key_index: 3 });
        let back = PodConfig::from_json(&cfg.to_json()).unwrap();
        assert_eq!(back, cfg);
        assert_eq!(
            back.devices.get("net"),
            Some(&DeviceSpec::Network { key_index: 3 })
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        let cfg = PodConfig::new().with("", DeviceSpec::Random);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn empty_config_is_valid() {
        assert!(PodConfig::new().validate().is_ok());
    }
}
