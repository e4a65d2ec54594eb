//! Region broker
//!
//! Lets local overlay applications claim screen rectangles and receive
//! the raw touches that land in them.

pub mod protocol;
pub mod regions;
pub mod server;

pub use protocol::{TouchMessage, TouchPhase};
#[cfg(test)]
pub use regions::Rect;
pub use regions::{ClientId, RegionTable};
pub use server::Broker;
