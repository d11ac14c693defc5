//! SkyWatch Runtime
//!
//! Drives the poll → normalize → geofence → classify → track → notify cycle
//! on a fixed interval until shutdown is signalled.

pub mod watch;

pub use watch::*;
