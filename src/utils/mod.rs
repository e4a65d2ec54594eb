//! Utility types shared across touchmux
//!
//! Common helpers that don't fit in specialized modules.

pub mod arena;

pub use arena::{Arena, Handle};
