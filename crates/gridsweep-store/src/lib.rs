//! gridsweep-store: Run output storage
//!
//! This crate provides the filesystem collaborator of the dispatcher:
//! - The `RunStore` trait (directories, markers, argument records)
//! - A local-disk store
//! - An in-memory store for tests and dry experiments

pub mod local;
pub mod memory;
pub mod traits;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use traits::RunStore;
