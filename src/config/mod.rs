//! Configuration file management
//!
//! Loads TOML configuration files and provides daemon settings.
//! Default config path: ~/.config/touchmux/config.toml

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[cfg(target_os = "linux")]
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
#[cfg(target_os = "linux")]
use std::path::Path;
#[cfg(target_os = "linux")]
use std::sync::mpsc;

use crate::constants;

/// Daemon settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gesture thresholds and scroll tuning (hot-reloadable)
    pub gesture: GestureConfig,
    /// Desktop geometry
    pub screen: ScreenConfig,
    /// Device discovery
    pub devices: DevicesConfig,
    /// Region broker
    pub broker: BrokerConfig,
}

/// How single-finger drags reach the desktop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DragMode {
    /// Relative pointer motion (touchpad-like)
    Relative,
    /// Touch-down, absolute motion, touch-up (cursor follows finger)
    Absolute,
}

/// Gesture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Travel that turns a touch into a drag (pixels)
    pub move_threshold_px: i32,
    /// Hold time for a right click (ms)
    pub long_press_ms: u64,
    /// Event loop tick (ms)
    pub tick_ms: u64,
    /// "relative" or "absolute"
    pub drag_mode: DragMode,
    /// Tap then touch again to drag with the left button held
    pub tap_drag: bool,
    /// Window for the second touch of a tap-drag (ms)
    pub double_tap_ms: u64,
    /// Hi-res scroll units per pixel of finger travel
    pub scroll_hires_per_px: f64,
    /// Acceleration gain per px/ms of finger speed
    pub scroll_accel: f64,
    /// Upper bound of the acceleration multiplier
    pub scroll_max_multiplier: f64,
    /// Content follows the fingers (finger down = wheel up)
    pub natural_scroll: bool,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            move_threshold_px: constants::MOVE_THRESHOLD_PX,
            long_press_ms: constants::LONG_PRESS_MS,
            tick_ms: constants::TICK_MS,
            drag_mode: DragMode::Relative,
            tap_drag: false,
            double_tap_ms: constants::DOUBLE_TAP_MS,
            scroll_hires_per_px: constants::SCROLL_HIRES_PER_PX,
            scroll_accel: constants::SCROLL_ACCEL,
            scroll_max_multiplier: constants::SCROLL_MAX_MULTIPLIER,
            natural_scroll: true,
        }
    }
}

/// Screen geometry (0 = derive from the first device)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: i32,
    pub height: i32,
    pub count: u32,
}

/// Explicit device-to-screen assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenMapping {
    /// Substring of the device name or node path
    #[serde(rename = "match")]
    pub pattern: String,
    pub screen: u32,
}

/// Device discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Accept only device names containing one of these (empty = any)
    pub name_filter: Vec<String>,
    /// Require INPUT_PROP_DIRECT (rejects touchpads)
    pub require_direct: bool,
    /// Take exclusive access to accepted devices
    pub grab: bool,
    /// Follow devices added/removed after startup
    pub hotplug: bool,
    /// Device-to-screen overrides
    pub screen_map: Vec<ScreenMapping>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            name_filter: Vec::new(),
            require_direct: false,
            grab: true,
            hotplug: true,
            screen_map: Vec::new(),
        }
    }
}

impl DevicesConfig {
    /// Screen index configured for a device, if any
    pub fn screen_for(&self, name: &str, path: &str) -> Option<u32> {
        self.screen_map
            .iter()
            .find(|m| name.contains(m.pattern.as_str()) || path.contains(m.pattern.as_str()))
            .map(|m| m.screen)
    }
}

/// Region broker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Local socket path
    pub socket_path: String,
    /// Simultaneous client connections
    pub max_clients: usize,
    /// Send REGION_REJECTED on refused registrations
    pub send_nack: bool,
    /// Socket file permissions
    pub socket_mode: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            socket_path: constants::BROKER_SOCKET_PATH.to_string(),
            max_clients: constants::MAX_CLIENTS,
            send_nack: false,
            socket_mode: 0o666,
        }
    }
}

impl Config {
    /// System-wide config path
    const SYSTEM_CONFIG_PATH: &'static str = "/etc/touchmux/config.toml";

    /// Get the path that would be used for loading config
    /// Returns None if using built-in defaults
    pub fn config_path() -> Option<PathBuf> {
        // 1. TOUCHMUX_CONFIG environment variable
        if let Ok(path) = std::env::var("TOUCHMUX_CONFIG") {
            let p = std::path::Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        // 2. User config: ~/.config/touchmux/config.toml
        if let Some(config_path) = default_config_path() {
            if config_path.exists() {
                return Some(config_path);
            }
        }

        // 3. System config: /etc/touchmux/config.toml
        let system_config = std::path::Path::new(Self::SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            return Some(system_config.to_path_buf());
        }

        None
    }

    /// Load configuration with priority:
    /// 1. TOUCHMUX_CONFIG environment variable
    /// 2. ~/.config/touchmux/config.toml (user config)
    /// 3. /etc/touchmux/config.toml (system config)
    /// 4. Built-in defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!("Loaded config: {}", path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load config {}: {:#}", path.display(), e);
                }
            }
        }
        info!("Using built-in default config");
        Self::default()
    }

    /// Load settings from specified path
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write a commented template (target: "user" or "system")
    pub fn write_template(target: &str, force: bool) -> Result<PathBuf> {
        let config_path = Self::template_path(target)?;
        if config_path.exists() && !force {
            anyhow::bail!(
                "Config file already exists: {} (use --force to overwrite)",
                config_path.display()
            );
        }
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        std::fs::write(&config_path, Self::template())
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Ok(config_path)
    }

    /// Path a template for `target` would be written to
    pub fn template_path(target: &str) -> Result<PathBuf> {
        if target == "system" {
            Ok(PathBuf::from(Self::SYSTEM_CONFIG_PATH))
        } else {
            default_config_path().ok_or_else(|| anyhow::anyhow!("Config directory not found"))
        }
    }

    /// Default settings rendered as documented TOML
    pub fn template() -> String {
        let d = Config::default();
        let g = &d.gesture;
        format!(
            r#"# touchmux configuration
#
# Lookup order: $TOUCHMUX_CONFIG, ~/.config/touchmux/config.toml,
# /etc/touchmux/config.toml. Missing keys use built-in defaults.

[gesture]
# Reloaded automatically when this file changes.
move_threshold_px = {move_threshold}
long_press_ms = {long_press}
tick_ms = {tick}
# "relative" moves the pointer like a touchpad,
# "absolute" makes the cursor follow the finger.
drag_mode = "relative"
# Tap, then touch again within double_tap_ms to drag with the left button held
tap_drag = false
double_tap_ms = {double_tap}
scroll_hires_per_px = {hires:.1}
scroll_accel = {accel:.1}
scroll_max_multiplier = {max_mult:.1}
natural_scroll = true

[screen]
# 0 = derive from the first touch device
width = 0
height = 0
count = 0

[devices]
# Substrings of accepted device names; empty accepts any touchscreen
name_filter = []
require_direct = false
grab = true
hotplug = true
# [[devices.screen_map]]
# match = "Goodix"
# screen = 1

[broker]
socket_path = "{socket}"
max_clients = {max_clients}
send_nack = false
socket_mode = 0o666
"#,
            move_threshold = g.move_threshold_px,
            long_press = g.long_press_ms,
            tick = g.tick_ms,
            double_tap = g.double_tap_ms,
            hires = g.scroll_hires_per_px,
            accel = g.scroll_accel,
            max_mult = g.scroll_max_multiplier,
            socket = d.broker.socket_path,
            max_clients = d.broker.max_clients,
        )
    }
}

/// Config file change watcher (Linux only)
#[cfg(target_os = "linux")]
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<()>,
}

#[cfg(target_os = "linux")]
impl ConfigWatcher {
    /// Start watching config file
    pub fn new(config_path: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                // Editors often save by writing to a temp file then renaming
                use notify::EventKind;
                match event.kind {
                    EventKind::Modify(_) | EventKind::Create(_) => {
                        let _ = tx.send(());
                    }
                    _ => {}
                }
            }
        })?;

        // Watch the parent directory to catch rename operations
        let watch_path = config_path.parent().unwrap_or(config_path);
        watcher.watch(watch_path, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Check if config file was modified (non-blocking, drains bursts)
    pub fn check_reload(&self) -> bool {
        let mut changed = false;
        while self.rx.try_recv().is_ok() {
            changed = true;
        }
        changed
    }
}

/// Get default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("touchmux").join("config.toml"))
}
