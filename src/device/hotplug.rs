//! Input device hotplug detection
//!
//! Monitors udev events on the input subsystem so touchscreens that
//! appear or vanish after startup are picked up by the registry.

use anyhow::{Context, Result};
use log::{debug, info};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;

use super::registry::event_node_number;

/// Hotplug event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    /// An event node appeared
    Added(PathBuf),
    /// An event node went away
    Removed(PathBuf),
}

/// udev-based hotplug monitor for input devices
pub struct HotplugMonitor {
    socket: udev::MonitorSocket,
}

impl HotplugMonitor {
    /// Create a new hotplug monitor for the input subsystem
    pub fn new() -> Result<Self> {
        let socket = udev::MonitorBuilder::new()
            .context("Failed to create udev monitor builder")?
            .match_subsystem("input")
            .context("Failed to match input subsystem")?
            .listen()
            .context("Failed to start udev monitor")?;

        info!("Input hotplug monitor initialized");
        Ok(Self { socket })
    }

    /// Get the raw file descriptor for polling
    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Drain pending udev events (non-blocking)
    pub fn poll(&mut self) -> Vec<HotplugEvent> {
        let mut events = Vec::new();
        for event in self.socket.iter() {
            let Some(devnode) = event.devnode() else {
                continue;
            };
            let is_event_node = devnode
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(event_node_number)
                .is_some();
            if !is_event_node {
                continue;
            }

            let path = devnode.to_path_buf();
            debug!("Input hotplug: {:?} {:?}", event.event_type(), path);
            match event.event_type() {
                udev::EventType::Add => events.push(HotplugEvent::Added(path)),
                udev::EventType::Remove => events.push(HotplugEvent::Removed(path)),
                _ => {}
            }
        }
        events
    }
}
