//! Touch device registry
//!
//! Discovers multi-touch screens under /dev/input, opens them
//! non-blocking, optionally grabs them, and decodes their event streams
//! into per-device frames. Devices live in a generational arena so a
//! stale [`DeviceId`] never addresses a device that replaced it.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use super::caps::{CapabilityMatcher, DeviceInfo, DeviceMatcher};
use super::ioctl;
use super::slots::{Contact, Decoded, SlotTable};
use crate::config::DevicesConfig;
use crate::constants::{MAX_DEVICES, MAX_SLOTS, READ_BATCH_EVENTS};
use crate::lifecycle;
use crate::utils::{Arena, Handle};

const INPUT_DIR: &str = "/dev/input";

pub type DeviceId = Handle;

/// Contacts of one synchronized frame from one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchFrame {
    pub device: DeviceId,
    pub screen_index: u32,
    pub contacts: Vec<Contact>,
    /// The device went away; its Up contacts end touches without a gesture
    pub released: bool,
}

/// Whether a device is still usable after a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Alive,
    /// Node vanished (ENODEV); remove it
    Gone,
}

/// One opened touchscreen
pub struct TouchDevice {
    file: File,
    pub info: DeviceInfo,
    pub slots: SlotTable,
    pub grabbed: bool,
    pub screen_index: u32,
}

impl TouchDevice {
    /// Largest (x, y) the device reports
    pub fn axis_max(&self) -> Option<(i32, i32)> {
        match (&self.info.abs_x, &self.info.abs_y) {
            (Some(x), Some(y)) => Some((x.maximum, y.maximum)),
            _ => None,
        }
    }

    fn release_grab(&mut self) {
        if self.grabbed {
            let fd = self.file.as_raw_fd();
            if let Err(e) = ioctl::set_grab(fd, false) {
                debug!("Ungrab {:?} failed: {}", self.info.path, e);
            }
            lifecycle::untrack_grab(fd);
            self.grabbed = false;
        }
    }
}

impl Drop for TouchDevice {
    fn drop(&mut self) {
        self.release_grab();
    }
}

/// All accepted touchscreens
pub struct DeviceRegistry {
    devices: Arena<TouchDevice>,
    matcher: Box<dyn DeviceMatcher>,
    config: DevicesConfig,
}

impl DeviceRegistry {
    pub fn new(config: DevicesConfig) -> Self {
        let matcher = CapabilityMatcher::from_config(&config);
        Self::with_matcher(config, Box::new(matcher))
    }

    pub fn with_matcher(config: DevicesConfig, matcher: Box<dyn DeviceMatcher>) -> Self {
        Self {
            devices: Arena::new(),
            matcher,
            config,
        }
    }

    /// Open every matching event node, in node-number order.
    /// Returns the number of devices accepted.
    pub fn scan(&mut self) -> Result<usize> {
        let entries = std::fs::read_dir(INPUT_DIR)
            .with_context(|| format!("Cannot read {}", INPUT_DIR))?;

        let mut nodes: Vec<(u32, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                let number = event_node_number(name.to_str()?)?;
                Some((number, e.path()))
            })
            .collect();
        nodes.sort();

        let mut accepted = 0;
        for (_, path) in nodes {
            match self.add_device(&path) {
                Ok(Some(_)) => accepted += 1,
                Ok(None) => {}
                Err(e) => debug!("Skipping {:?}: {:#}", path, e),
            }
        }
        Ok(accepted)
    }

    /// Open, probe and (if accepted) register one node.
    /// Ok(None) means the node is not a usable touchscreen.
    pub fn add_device(&mut self, path: &Path) -> Result<Option<DeviceId>> {
        if self.devices.iter().any(|(_, d)| d.info.path == path) {
            return Ok(None);
        }
        if self.devices.len() >= MAX_DEVICES {
            warn!("Device limit ({}) reached, ignoring {:?}", MAX_DEVICES, path);
            return Ok(None);
        }

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)
            .with_context(|| format!("Cannot open {:?}", path))?;
        let fd = file.as_raw_fd();

        let info = DeviceInfo::probe(fd, path)?;
        if let Err(reason) = self.matcher.evaluate(&info) {
            debug!("Rejected {:?} ({}): {}", path, info.name, reason);
            return Ok(None);
        }

        let mut slots = SlotTable::new();
        if let Ok(abs) = ioctl::query_abs(fd, ioctl::ABS_MT_SLOT) {
            slots.set_current_slot(abs.value);
        }

        let grabbed = if self.config.grab {
            match ioctl::set_grab(fd, true) {
                Ok(()) => {
                    lifecycle::track_grab(fd);
                    info!("Grabbed exclusive access to {:?}", path);
                    true
                }
                Err(e) => {
                    warn!("Could not grab {:?}: {}", path, e);
                    false
                }
            }
        } else {
            false
        };

        let path_str = path.to_string_lossy();
        let screen_index = self
            .config
            .screen_for(&info.name, &path_str)
            .unwrap_or_else(|| self.next_free_screen());

        info!("Found touchscreen {:?} '{}' -> screen {}", path, info.name, screen_index);

        let id = self.devices.insert(TouchDevice {
            file,
            info,
            slots,
            grabbed,
            screen_index,
        });
        Ok(Some(id))
    }

    /// Lowest screen index no device is mapped to
    fn next_free_screen(&self) -> u32 {
        (0..)
            .find(|i| !self.devices.iter().any(|(_, d)| d.screen_index == *i))
            .unwrap_or(0)
    }

    /// Drop a device, returning Up contacts for any fingers still down
    pub fn remove(&mut self, id: DeviceId) -> Option<TouchFrame> {
        let mut device = self.devices.remove(id)?;
        info!("Touch device {:?} removed", device.info.path);
        let contacts = device.slots.release_all();
        device.release_grab();
        if contacts.is_empty() {
            None
        } else {
            Some(TouchFrame {
                device: id,
                screen_index: device.screen_index,
                contacts,
                released: true,
            })
        }
    }

    pub fn find_by_path(&self, path: &Path) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(_, d)| d.info.path == path)
            .map(|(id, _)| id)
    }

    pub fn remove_by_path(&mut self, path: &Path) -> Option<TouchFrame> {
        let id = self.find_by_path(path)?;
        self.remove(id)
    }

    /// Ungrab and close everything. Safe to call more than once.
    pub fn cleanup(&mut self) {
        for mut device in self.devices.drain() {
            device.release_grab();
        }
    }

    pub fn get(&self, id: DeviceId) -> Option<&TouchDevice> {
        self.devices.get(id)
    }

    pub fn count(&self) -> usize {
        self.devices.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &TouchDevice)> {
        self.devices.iter()
    }

    /// Descriptors to wait on, tagged with their device
    pub fn poll_sources(&self) -> Vec<(DeviceId, BorrowedFd<'_>)> {
        self.devices.iter().map(|(id, d)| (id, d.file.as_fd())).collect()
    }

    /// Drain all pending events of one device into frames
    pub fn read(&mut self, id: DeviceId, frames: &mut Vec<TouchFrame>) -> DeviceStatus {
        let Some(device) = self.devices.get_mut(id) else {
            return DeviceStatus::Gone;
        };

        let event_size = std::mem::size_of::<libc::input_event>();
        let mut buf = vec![0u8; event_size * READ_BATCH_EVENTS];

        loop {
            let n = match device.file.read(&mut buf) {
                Ok(0) => return DeviceStatus::Alive,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return DeviceStatus::Alive,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                    debug!("{:?}: device gone", device.info.path);
                    return DeviceStatus::Gone;
                }
                Err(e) => {
                    warn!("{:?}: read failed: {}", device.info.path, e);
                    return DeviceStatus::Gone;
                }
            };

            for chunk in buf[..n].chunks_exact(event_size) {
                // SAFETY: chunk is exactly one input_event worth of bytes
                let ev: libc::input_event =
                    unsafe { std::ptr::read_unaligned(chunk.as_ptr() as *const libc::input_event) };
                let contacts = match device.slots.apply(ev.type_, ev.code, ev.value) {
                    Decoded::Pending => continue,
                    Decoded::Frame(contacts) => contacts,
                    Decoded::Resync => resync(device),
                };
                if !contacts.is_empty() {
                    frames.push(TouchFrame {
                        device: id,
                        screen_index: device.screen_index,
                        contacts,
                        released: false,
                    });
                }
            }

            if n < buf.len() {
                return DeviceStatus::Alive;
            }
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Re-read slot state after SYN_DROPPED
fn resync(device: &mut TouchDevice) -> Vec<Contact> {
    let fd = device.file.as_raw_fd();
    let query = |code| ioctl::query_mt_slots(fd, code, MAX_SLOTS);
    match (
        query(ioctl::ABS_MT_TRACKING_ID),
        query(ioctl::ABS_MT_POSITION_X),
        query(ioctl::ABS_MT_POSITION_Y),
    ) {
        (Ok(ids), Ok(xs), Ok(ys)) => {
            debug!("{:?}: resynced after SYN_DROPPED", device.info.path);
            if let Ok(abs) = ioctl::query_abs(fd, ioctl::ABS_MT_SLOT) {
                device.slots.set_current_slot(abs.value);
            }
            device.slots.resync(&ids, &xs, &ys)
        }
        _ => {
            warn!("{:?}: slot resync failed, releasing contacts", device.info.path);
            device.slots.release_all()
        }
    }
}

/// `event12` -> 12
pub fn event_node_number(name: &str) -> Option<u32> {
    name.strip_prefix("event")?.parse().ok()
}
