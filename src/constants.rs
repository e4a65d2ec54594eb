//! Global constants for touchmux
//!
//! Consolidates gesture timing, device bounds, and protocol constants
//! to eliminate magic numbers throughout the codebase.

// ============================================================================
// Gesture Defaults
// ============================================================================

/// Distance a finger may travel before a touch stops being a tap (pixels)
pub const MOVE_THRESHOLD_PX: i32 = 10;

/// Hold duration that turns a stationary touch into a right click (ms)
pub const LONG_PRESS_MS: u64 = 500;

/// Event loop wake-up cadence, also drives the long-press timer (ms)
pub const TICK_MS: u64 = 10;

/// Max gap between a tap and the next touch-down for tap-drag (ms)
pub const DOUBLE_TAP_MS: u64 = 300;

/// Hi-res scroll units per pixel of two-finger travel
pub const SCROLL_HIRES_PER_PX: f64 = 10.0;

/// Scroll acceleration gain per px/ms of finger speed
pub const SCROLL_ACCEL: f64 = 0.5;

/// Upper bound for the scroll acceleration multiplier
pub const SCROLL_MAX_MULTIPLIER: f64 = 4.0;

/// Hi-res units that make up one wheel notch (kernel convention)
pub const HIRES_PER_NOTCH: i32 = 120;

// ============================================================================
// Device Bounds
// ============================================================================

/// Multi-touch slots tracked per device
pub const MAX_SLOTS: usize = 10;

/// Touch devices accepted at once
pub const MAX_DEVICES: usize = 4;

/// Fallback axis maximum when a device does not report one
pub const DEFAULT_AXIS_MAX: i32 = 4095;

/// Raw events read per read() call
pub const READ_BATCH_EVENTS: usize = 64;

// ============================================================================
// Virtual Pointer Identity
// ============================================================================

pub const VIRTUAL_POINTER_NAME: &str = "touchmux virtual pointer";
pub const VIRTUAL_POINTER_VENDOR: u16 = 0x1234;
pub const VIRTUAL_POINTER_PRODUCT: u16 = 0x5678;

// ============================================================================
// Region Broker
// ============================================================================

/// Well-known broker socket path
pub const BROKER_SOCKET_PATH: &str = "/tmp/touch-scroll-proxy.sock";

/// Simultaneous client connections
pub const MAX_CLIENTS: usize = 4;

/// Bytes buffered per client before the buffer is discarded
pub const CLIENT_BUFFER_LIMIT: usize = 4096;

// ============================================================================
// Broker Wire Protocol
// ============================================================================

pub const MSG_REGISTER_REGION: i32 = 1;
pub const MSG_UNREGISTER_REGION: i32 = 2;
pub const MSG_TOUCH_DOWN: i32 = 10;
pub const MSG_TOUCH_MOVE: i32 = 11;
pub const MSG_TOUCH_UP: i32 = 12;
pub const MSG_REGION_REJECTED: i32 = 20;

/// REGION_REJECTED reasons
pub const REJECT_CONFLICT: i32 = 1;
pub const REJECT_INVALID: i32 = 2;
