//! gridsweep-core: Core types for gridsweep
//!
//! This crate provides the parameter-grid resolution engine:
//! - Ordered parameter sets and values
//! - Placeholder templates with deferred resolution
//! - Cartesian grid expansion
//! - Run materialization (command lines and output roots)
//! - Device identifiers, configuration and error handling

pub mod config;
pub mod device;
pub mod error;
pub mod grid;
pub mod materializer;
pub mod params;
pub mod run;
pub mod template;

pub use config::*;
pub use device::*;
pub use error::*;
pub use grid::{GridAxis, GridExpander, GridIter};
pub use materializer::RunMaterializer;
pub use params::*;
pub use run::*;
pub use template::{Resolution, Template};
