//! SkyWatch Network Layer
//!
//! Everything that talks to the outside world:
//! - HTTP transport for the aircraft feed
//! - Cross-process request throttling through a shared lock file
//! - Tile fetching with retry, merge and hex deduplication
//! - Outbound contact notifications

pub mod transport;
pub mod ratelimit;
pub mod fetcher;
pub mod notify;

pub use transport::*;
pub use ratelimit::*;
pub use fetcher::*;
pub use notify::*;
