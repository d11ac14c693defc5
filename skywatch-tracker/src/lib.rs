//! SkyWatch Contact Tracking
//!
//! - **ContactRecord**: the persisted first-sighting row for a hex
//! - **ContactLog**: append-only durable sink (CSV file or in-memory)
//! - **ContactTracker**: first-sight detection, batched appends and the
//!   per-run memory of each contact's latest sample

pub mod record;
pub mod store;
pub mod tracker;

pub use record::*;
pub use store::*;
pub use tracker::*;
