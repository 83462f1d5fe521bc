//! Spatial VCS command line support
//!
//! The `svcs` binary is a thin clap front end over these modules:
//! - [`simulate`]: seeded fleet of concurrent capture probes, merges and
//!   invariant checks
//! - [`stress`]: chunk store throughput and deduplication
//! - [`inspect`]: statistics and integrity of a filesystem chunk store

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod inspect;
pub mod simulate;
pub mod stress;

pub use inspect::{inspect_store, InspectReport};
pub use simulate::{run_simulation, SimulationReport, SimulatorConfig};
pub use stress::{run_stress, StressConfig, StressReport};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
