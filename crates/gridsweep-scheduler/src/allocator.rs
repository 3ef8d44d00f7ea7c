//! Device allocator for bounding concurrent runs per device
//!
//! Every device carries an in-flight counter. Choosing the least loaded
//! device and bumping its counter happen under one lock, so two workers can
//! never both claim the last free slot on a device.

use gridsweep_core::{DeviceId, DeviceSet, SweepError, SweepResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct AllocatorState {
    /// In-flight runs, indexed like `Shared::devices`
    counts: Vec<usize>,
    rng: StdRng,
}

#[derive(Debug)]
struct Shared {
    devices: Vec<DeviceId>,
    cap: usize,
    poll_interval: Duration,
    state: Mutex<AllocatorState>,
}

/// Tracks in-flight runs per device and hands out device slots
#[derive(Clone, Debug)]
pub struct DeviceAllocator {
    inner: Arc<Shared>,
}

impl DeviceAllocator {
    /// Create an allocator allowing `cap` concurrent runs per device
    pub fn new(devices: DeviceSet, cap: usize, poll_interval: Duration) -> SweepResult<Self> {
        Self::with_rng(devices, cap, poll_interval, StdRng::from_entropy())
    }

    /// Create an allocator with a deterministic tie-break
    pub fn with_seed(
        devices: DeviceSet,
        cap: usize,
        poll_interval: Duration,
        seed: u64,
    ) -> SweepResult<Self> {
        Self::with_rng(devices, cap, poll_interval, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        devices: DeviceSet,
        cap: usize,
        poll_interval: Duration,
        rng: StdRng,
    ) -> SweepResult<Self> {
        if cap == 0 {
            return Err(SweepError::Config(
                "max_jobs_per_device must be positive".to_string(),
            ));
        }

        let devices = devices.devices().to_vec();
        info!(
            devices = devices.len(),
            cap = cap,
            "Device allocator initialized"
        );

        Ok(Self {
            inner: Arc::new(Shared {
                state: Mutex::new(AllocatorState {
                    counts: vec![0; devices.len()],
                    rng,
                }),
                devices,
                cap,
                poll_interval,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AllocatorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Concurrent runs allowed per device
    pub fn cap(&self) -> usize {
        self.inner.cap
    }

    /// Devices managed by this allocator
    pub fn devices(&self) -> &[DeviceId] {
        &self.inner.devices
    }

    /// Claim a slot on the least loaded device, if any has room
    ///
    /// Ties between equally loaded devices are broken at random.
    pub fn try_acquire(&self) -> Option<DeviceLease> {
        let mut state = self.lock();
        let min = state.counts.iter().copied().min()?;
        if min >= self.inner.cap {
            return None;
        }

        let candidates: Vec<usize> = state
            .counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == min)
            .map(|(i, _)| i)
            .collect();
        let chosen = *candidates.choose(&mut state.rng)?;
        state.counts[chosen] += 1;

        let device = self.inner.devices[chosen].clone();
        debug!(
            device = %device,
            in_flight = state.counts[chosen],
            "Acquired device slot"
        );

        Some(DeviceLease {
            allocator: self.clone(),
            device,
            released: false,
        })
    }

    /// Claim a slot, polling until one frees up
    ///
    /// Blocks without a deadline; wrap in `tokio::time::timeout` to bound it.
    pub async fn acquire(&self) -> DeviceLease {
        let mut waited = false;
        loop {
            if let Some(lease) = self.try_acquire() {
                return lease;
            }
            if !waited {
                warn!(
                    cap = self.inner.cap,
                    poll_secs = self.inner.poll_interval.as_secs_f64(),
                    "All devices are at capacity, waiting"
                );
                waited = true;
            }
            tokio::time::sleep(self.inner.poll_interval).await;
        }
    }

    /// Give back a slot on `device`
    ///
    /// Counters never drop below zero; unknown devices are ignored.
    pub fn release(&self, device: &DeviceId) {
        let Some(index) = self.inner.devices.iter().position(|d| d == device) else {
            warn!(device = %device, "Release for unknown device ignored");
            return;
        };

        let mut state = self.lock();
        if state.counts[index] == 0 {
            warn!(device = %device, "Release without a matching acquire ignored");
            return;
        }
        state.counts[index] -= 1;
        debug!(
            device = %device,
            in_flight = state.counts[index],
            "Released device slot"
        );
    }

    /// In-flight runs on a device
    pub fn in_flight(&self, device: &DeviceId) -> Option<usize> {
        let index = self.inner.devices.iter().position(|d| d == device)?;
        Some(self.lock().counts[index])
    }

    /// Current load of every device
    pub fn snapshot(&self) -> Vec<DeviceLoad> {
        let state = self.lock();
        self.inner
            .devices
            .iter()
            .zip(&state.counts)
            .map(|(device, &in_flight)| DeviceLoad {
                device: device.clone(),
                in_flight,
                cap: self.inner.cap,
            })
            .collect()
    }
}

/// Device with its current load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceLoad {
    /// Device identifier
    pub device: DeviceId,
    /// Runs currently holding a slot
    pub in_flight: usize,
    /// Configured per-device cap
    pub cap: usize,
}

/// A held device slot; dropping it releases the slot
pub struct DeviceLease {
    allocator: DeviceAllocator,
    device: DeviceId,
    released: bool,
}

impl DeviceLease {
    /// Device this slot belongs to
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Release the slot now
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.allocator.release(&self.device);
        }
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for DeviceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLease")
            .field("device", &self.device)
            .field("released", &self.released)
            .finish()
    }
}
