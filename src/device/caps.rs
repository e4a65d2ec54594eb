//! Device capability probing and matching
//!
//! Probes an opened evdev node for the capabilities a touchscreen must
//! have, and decides acceptance through a pluggable [`DeviceMatcher`].

use anyhow::Result;
use bitflags::bitflags;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::ioctl::{self, InputAbsInfo};
use crate::config::DevicesConfig;

bitflags! {
    /// Capabilities relevant to touch arbitration
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceCaps: u8 {
        /// EV_ABS / ABS_MT_SLOT (type B multi-touch protocol)
        const MT_SLOT      = 0b0001;
        /// EV_ABS / ABS_MT_POSITION_X and ABS_MT_POSITION_Y
        const MT_POSITION  = 0b0010;
        /// EV_KEY / BTN_TOUCH
        const TOUCH_BUTTON = 0b0100;
        /// INPUT_PROP_DIRECT (touchscreen, not touchpad)
        const DIRECT       = 0b1000;
    }
}

/// Snapshot of a probed evdev node
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub caps: DeviceCaps,
    /// ABS_MT_POSITION_X range
    pub abs_x: Option<InputAbsInfo>,
    /// ABS_MT_POSITION_Y range
    pub abs_y: Option<InputAbsInfo>,
}

impl DeviceInfo {
    /// Query name, capability bitmaps and axis ranges
    pub fn probe(fd: RawFd, path: &Path) -> Result<Self> {
        let name = ioctl::query_name(fd).unwrap_or_default();
        let abs_bits = ioctl::query_bits(fd, ioctl::EV_ABS, ioctl::ABS_MAX)?;
        let key_bits = ioctl::query_bits(fd, ioctl::EV_KEY, ioctl::KEY_MAX)?;
        // Older kernels lack EVIOCGPROP; treat as "no properties"
        let props = ioctl::query_props(fd).unwrap_or_default();

        let mut caps = DeviceCaps::empty();
        if ioctl::test_bit(&abs_bits, ioctl::ABS_MT_SLOT) {
            caps |= DeviceCaps::MT_SLOT;
        }
        if ioctl::test_bit(&abs_bits, ioctl::ABS_MT_POSITION_X)
            && ioctl::test_bit(&abs_bits, ioctl::ABS_MT_POSITION_Y)
        {
            caps |= DeviceCaps::MT_POSITION;
        }
        if ioctl::test_bit(&key_bits, ioctl::BTN_TOUCH) {
            caps |= DeviceCaps::TOUCH_BUTTON;
        }
        if ioctl::test_bit(&props, ioctl::INPUT_PROP_DIRECT) {
            caps |= DeviceCaps::DIRECT;
        }

        let (abs_x, abs_y) = if caps.contains(DeviceCaps::MT_POSITION) {
            (
                ioctl::query_abs(fd, ioctl::ABS_MT_POSITION_X).ok(),
                ioctl::query_abs(fd, ioctl::ABS_MT_POSITION_Y).ok(),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            path: path.to_path_buf(),
            name,
            caps,
            abs_x,
            abs_y,
        })
    }
}

/// Why a device was not accepted
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("missing capabilities {0:?}")]
    MissingCapabilities(DeviceCaps),
    #[error("name '{0}' does not match the configured filter")]
    NameMismatch(String),
}

/// Predicate over probed device capabilities
pub trait DeviceMatcher {
    fn evaluate(&self, info: &DeviceInfo) -> std::result::Result<(), Rejection>;
}

/// Default matcher: required capability set plus optional name filter
#[derive(Debug, Clone)]
pub struct CapabilityMatcher {
    pub required: DeviceCaps,
    /// Accept only names containing one of these substrings (empty = any)
    pub name_filter: Vec<String>,
}

impl Default for CapabilityMatcher {
    fn default() -> Self {
        Self {
            required: DeviceCaps::MT_SLOT | DeviceCaps::MT_POSITION | DeviceCaps::TOUCH_BUTTON,
            name_filter: Vec::new(),
        }
    }
}

impl CapabilityMatcher {
    pub fn from_config(cfg: &DevicesConfig) -> Self {
        let mut matcher = Self::default();
        if cfg.require_direct {
            matcher.required |= DeviceCaps::DIRECT;
        }
        matcher.name_filter = cfg.name_filter.clone();
        matcher
    }
}

impl DeviceMatcher for CapabilityMatcher {
    fn evaluate(&self, info: &DeviceInfo) -> std::result::Result<(), Rejection> {
        let missing = self.required - info.caps;
        if !missing.is_empty() {
            return Err(Rejection::MissingCapabilities(missing));
        }
        if !self.name_filter.is_empty()
            && !self.name_filter.iter().any(|f| info.name.contains(f.as_str()))
        {
            return Err(Rejection::NameMismatch(info.name.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, caps: DeviceCaps) -> DeviceInfo {
        DeviceInfo {
            path: PathBuf::from("/dev/input/event0"),
            name: name.to_string(),
            caps,
            abs_x: None,
            abs_y: None,
        }
    }

    #[test]
    fn test_default_matcher_requires_multitouch_and_touch_button() {
        let m = CapabilityMatcher::default();
        let full = DeviceCaps::MT_SLOT | DeviceCaps::MT_POSITION | DeviceCaps::TOUCH_BUTTON;
        assert_eq!(m.evaluate(&info("Goodix Capacitive TouchScreen", full)), Ok(()));
        assert_eq!(
            m.evaluate(&info("USB Mouse", DeviceCaps::empty())),
            Err(Rejection::MissingCapabilities(full))
        );
        assert_eq!(
            m.evaluate(&info("pad", DeviceCaps::MT_SLOT | DeviceCaps::MT_POSITION)),
            Err(Rejection::MissingCapabilities(DeviceCaps::TOUCH_BUTTON))
        );
    }

    #[test]
    fn test_name_filter() {
        let m = CapabilityMatcher {
            name_filter: vec!["Goodix".to_string()],
            ..CapabilityMatcher::default()
        };
        let caps = DeviceCaps::all();
        assert!(m.evaluate(&info("Goodix Capacitive TouchScreen", caps)).is_ok());
        assert_eq!(
            m.evaluate(&info("ILITEK Touch", caps)),
            Err(Rejection::NameMismatch("ILITEK Touch".to_string()))
        );
    }

    #[test]
    fn test_require_direct() {
        let cfg = DevicesConfig {
            require_direct: true,
            ..DevicesConfig::default()
        };
        let m = CapabilityMatcher::from_config(&cfg);
        let touchpad = DeviceCaps::MT_SLOT | DeviceCaps::MT_POSITION | DeviceCaps::TOUCH_BUTTON;
        assert_eq!(
            m.evaluate(&info("Touchpad", touchpad)),
            Err(Rejection::MissingCapabilities(DeviceCaps::DIRECT))
        );
        assert!(m.evaluate(&info("Screen", touchpad | DeviceCaps::DIRECT)).is_ok());
    }
}
