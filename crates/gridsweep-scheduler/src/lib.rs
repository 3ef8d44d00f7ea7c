//! gridsweep-scheduler: Device-aware sweep scheduler for gridsweep
//!
//! This crate dispatches materialized runs onto devices:
//! - Per-device slot allocation with a concurrency cap
//! - Distributed mode handing every run the whole device set
//! - Marker-based skipping of finished runs
//! - Per-run outcomes and the sweep report

pub mod allocator;
pub mod report;
pub mod scheduler;
pub mod strategy;

pub use allocator::{DeviceAllocator, DeviceLease, DeviceLoad};
pub use report::{RunOutcome, RunState, SweepReport};
pub use scheduler::{CancelHandle, PlannedRun, Scheduler, SweepStatus};
pub use strategy::{SlotLease, SlotStrategy};
