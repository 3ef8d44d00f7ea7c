//! Slot strategies deciding which devices a run gets

use gridsweep_core::{DeviceId, DeviceSet, SchedulingConfig, SweepError, SweepResult};
use std::slice;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

use crate::allocator::{DeviceAllocator, DeviceLease};

/// How runs are mapped onto devices
pub enum SlotStrategy {
    /// Each run gets one device, at most `cap` runs per device
    PerDevice(DeviceAllocator),
    /// Each run gets every device, at most `cap` runs at once
    Distributed {
        devices: DeviceSet,
        permits: Arc<Semaphore>,
    },
}

impl SlotStrategy {
    /// Build the strategy described by a scheduling configuration
    pub fn from_config(config: &SchedulingConfig) -> SweepResult<Self> {
        config.validate()?;
        let devices = config.device_set()?;

        if config.distributed {
            info!(
                devices = devices.len(),
                concurrent_runs = config.max_jobs_per_device,
                "Distributed slot strategy selected"
            );
            Ok(SlotStrategy::Distributed {
                devices,
                permits: Arc::new(Semaphore::new(config.max_jobs_per_device)),
            })
        } else {
            Ok(SlotStrategy::PerDevice(DeviceAllocator::new(
                devices,
                config.max_jobs_per_device,
                config.poll_interval,
            )?))
        }
    }

    /// Wait for a slot
    pub async fn acquire(&self) -> SweepResult<SlotLease> {
        match self {
            SlotStrategy::PerDevice(allocator) => Ok(SlotLease::Device(allocator.acquire().await)),
            SlotStrategy::Distributed { devices, permits } => {
                let permit = permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| SweepError::Internal(format!("slot pool closed: {}", e)))?;
                Ok(SlotLease::AllDevices {
                    devices: devices.devices().to_vec(),
                    _permit: permit,
                })
            }
        }
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(&self) -> Option<SlotLease> {
        match self {
            SlotStrategy::PerDevice(allocator) => allocator.try_acquire().map(SlotLease::Device),
            SlotStrategy::Distributed { devices, permits } => {
                let permit = permits.clone().try_acquire_owned().ok()?;
                Some(SlotLease::AllDevices {
                    devices: devices.devices().to_vec(),
                    _permit: permit,
                })
            }
        }
    }

    /// Strategy name for logs
    pub fn name(&self) -> &'static str {
        match self {
            SlotStrategy::PerDevice(_) => "per-device",
            SlotStrategy::Distributed { .. } => "distributed",
        }
    }
}

/// A held slot; dropping it frees the slot
#[derive(Debug)]
pub enum SlotLease {
    Device(DeviceLease),
    AllDevices {
        devices: Vec<DeviceId>,
        _permit: OwnedSemaphorePermit,
    },
}

impl SlotLease {
    /// Devices assigned to the holder
    pub fn devices(&self) -> &[DeviceId] {
        match self {
            SlotLease::Device(lease) => slice::from_ref(lease.device()),
            SlotLease::AllDevices { devices, .. } => devices,
        }
    }
}
