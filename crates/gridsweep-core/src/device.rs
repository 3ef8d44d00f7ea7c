//! Device identifiers and the static device list

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{SweepError, SweepResult};

/// Identifier of one exclusive compute device (e.g. a CUDA ordinal)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as it appears in the device environment variable
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId::new(s)
    }
}

impl From<u32> for DeviceId {
    fn from(index: u32) -> Self {
        DeviceId::new(index.to_string())
    }
}

/// Validated, non-empty list of distinct devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSet {
    devices: Vec<DeviceId>,
}

impl DeviceSet {
    /// Validate a device list
    pub fn new(devices: Vec<DeviceId>) -> SweepResult<Self> {
        if devices.is_empty() {
            return Err(SweepError::Devices("no devices given".to_string()));
        }

        let mut seen = HashSet::new();
        for device in &devices {
            if device.as_str().trim().is_empty() {
                return Err(SweepError::Devices("blank device id".to_string()));
            }
            if !seen.insert(device) {
                return Err(SweepError::Devices(format!(
                    "device {} listed more than once",
                    device
                )));
            }
        }

        Ok(Self { devices })
    }

    /// Parse a comma-separated list such as `0,1,3`
    pub fn parse(list: &str) -> SweepResult<Self> {
        Self::new(list.split(',').map(|s| DeviceId::new(s.trim())).collect())
    }

    /// Devices in configured order
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Always false for a validated set
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Comma-joined ids, the format of `CUDA_VISIBLE_DEVICES`
    pub fn env_value(&self) -> String {
        join_devices(&self.devices)
    }
}

/// Join device ids with commas
pub fn join_devices(devices: &[DeviceId]) -> String {
    devices
        .iter()
        .map(DeviceId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
