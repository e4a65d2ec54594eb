//! Desktop layout
//!
//! Physical panels are stacked vertically into one logical desktop.
//! Screen `k` starts at `y = k × height`.

use crate::config::ScreenConfig;
use crate::constants::DEFAULT_AXIS_MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenLayout {
    /// Width of every panel (pixels)
    pub width: i32,
    /// Height of every panel (pixels)
    pub height: i32,
    /// Number of stacked panels
    pub count: u32,
}

impl ScreenLayout {
    /// Resolve geometry: config values win, else the first device's axis
    /// maxima (`max + 1`), else the fallback axis range
    pub fn resolve(cfg: &ScreenConfig, first_axis_max: Option<(i32, i32)>, devices: usize) -> Self {
        let (max_x, max_y) = first_axis_max.unwrap_or((DEFAULT_AXIS_MAX, DEFAULT_AXIS_MAX));
        let width = if cfg.width > 0 { cfg.width } else { max_x + 1 };
        let height = if cfg.height > 0 { cfg.height } else { max_y + 1 };
        let count = if cfg.count > 0 {
            cfg.count
        } else {
            (devices as u32).max(1)
        };
        Self {
            width,
            height,
            count,
        }
    }

    /// Y offset of a screen within the desktop
    pub fn screen_offset(&self, screen_index: u32) -> i32 {
        screen_index as i32 * self.height
    }

    /// Screen-relative coordinates to logical desktop coordinates
    pub fn to_logical(&self, screen_index: u32, x: i32, y: i32) -> (i32, i32) {
        (x, y + self.screen_offset(screen_index))
    }

    /// Inclusive maxima of the unified desktop
    pub fn desktop_max(&self) -> (i32, i32) {
        (self.width - 1, self.height * self.count as i32 - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dual_screen_mapping() {
        let layout = ScreenLayout::resolve(&ScreenConfig::default(), Some((719, 1279)), 2);
        assert_eq!(layout.height, 1280);
        assert_eq!(layout.to_logical(0, 15, 50), (15, 50));
        assert_eq!(layout.to_logical(1, 15, 50), (15, 50 + 1280));
        assert_eq!(layout.desktop_max(), (719, 2559));
    }

    #[test]
    fn test_config_overrides_device_geometry() {
        let cfg = ScreenConfig {
            width: 800,
            height: 480,
            count: 2,
        };
        let layout = ScreenLayout::resolve(&cfg, Some((4095, 4095)), 1);
        assert_eq!(layout.to_logical(1, 0, 0), (0, 480));
        assert_eq!(layout.desktop_max(), (799, 959));
    }

    #[test]
    fn test_fallback_without_devices() {
        let layout = ScreenLayout::resolve(&ScreenConfig::default(), None, 0);
        assert_eq!(layout.count, 1);
        assert_eq!(layout.desktop_max(), (DEFAULT_AXIS_MAX, DEFAULT_AXIS_MAX));
    }
}
