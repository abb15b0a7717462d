//! Quality-control check library.
//!
//! Everything in here is synchronous and free of I/O. Checks that need
//! context from before a batch (persistence, spike/dip) expose a pure
//! `lookback`/`evaluate` pair; the services do the fetching in between.

pub mod aggregate;
pub mod buddy;
pub mod models;
pub mod persistence;
pub mod range;
pub mod registry;
pub mod spike_dip;
pub mod window;

pub use aggregate::{aggregate_columns, aggregate_row, QcOutcome};
pub use buddy::{buddy_check, BuddyParams, SpatialVerdict};
pub use models::*;
pub use persistence::PersistenceParams;
pub use range::RangeParams;
pub use registry::{CheckConfig, ParameterChecks, QcRegistry};
pub use spike_dip::SpikeDipParams;
