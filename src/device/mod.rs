//! Touchscreen input devices

pub mod caps;
#[cfg(target_os = "linux")]
pub mod hotplug;
pub mod ioctl;
pub mod registry;
pub mod slots;

#[cfg(target_os = "linux")]
pub use hotplug::{HotplugEvent, HotplugMonitor};
pub use registry::{DeviceId, DeviceRegistry, DeviceStatus, TouchFrame};
pub use slots::{Contact, ContactPhase};
