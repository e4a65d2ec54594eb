//! uinput-backed virtual pointer
//!
//! Creates one synthetic device with relative axes, an absolute range
//! covering the whole unified desktop, left/right/middle buttons, touch
//! contact, and both notch and hi-res wheels. Every action is written
//! with a single write() ending in SYN_REPORT.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use super::{Button, PointerAction, PointerSink};
use crate::constants::{VIRTUAL_POINTER_NAME, VIRTUAL_POINTER_PRODUCT, VIRTUAL_POINTER_VENDOR};
use crate::device::ioctl::{self, InputAbsInfo, InputId, UinputAbsSetup, UinputSetup};
use crate::lifecycle;

const UINPUT_PATH: &str = "/dev/uinput";

/// Virtual pointer device
pub struct UinputPointer {
    file: File,
    max_x: i32,
    max_y: i32,
    destroyed: bool,
}

impl UinputPointer {
    /// Create the device with an absolute range of `0..=max_x`, `0..=max_y`
    pub fn new(max_x: i32, max_y: i32) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(UINPUT_PATH)
            .with_context(|| format!("Cannot open {}", UINPUT_PATH))?;
        let fd = file.as_raw_fd();

        for ev in [ioctl::EV_SYN, ioctl::EV_KEY, ioctl::EV_REL, ioctl::EV_ABS] {
            ioctl::ioctl_with_int_arg(fd, ioctl::UI_SET_EVBIT, ev as libc::c_int, "UI_SET_EVBIT")?;
        }
        for key in [
            ioctl::BTN_LEFT,
            ioctl::BTN_RIGHT,
            ioctl::BTN_MIDDLE,
            ioctl::BTN_TOUCH,
        ] {
            ioctl::ioctl_with_int_arg(fd, ioctl::UI_SET_KEYBIT, key as libc::c_int, "UI_SET_KEYBIT")?;
        }
        for rel in [
            ioctl::REL_X,
            ioctl::REL_Y,
            ioctl::REL_WHEEL,
            ioctl::REL_HWHEEL,
            ioctl::REL_WHEEL_HI_RES,
            ioctl::REL_HWHEEL_HI_RES,
        ] {
            ioctl::ioctl_with_int_arg(fd, ioctl::UI_SET_RELBIT, rel as libc::c_int, "UI_SET_RELBIT")?;
        }
        for (code, maximum) in [(ioctl::ABS_X, max_x), (ioctl::ABS_Y, max_y)] {
            ioctl::ioctl_with_int_arg(fd, ioctl::UI_SET_ABSBIT, code as libc::c_int, "UI_SET_ABSBIT")?;
            let setup = UinputAbsSetup {
                code,
                absinfo: InputAbsInfo {
                    maximum,
                    ..InputAbsInfo::default()
                },
            };
            ioctl::ioctl_with_ref_arg(fd, ioctl::UI_ABS_SETUP, &setup, "UI_ABS_SETUP")?;
        }
        let mut name = [0u8; 80];
        let bytes = VIRTUAL_POINTER_NAME.as_bytes();
        name[..bytes.len()].copy_from_slice(bytes);
        let setup = UinputSetup {
            id: InputId {
                bustype: ioctl::BUS_USB,
                vendor: VIRTUAL_POINTER_VENDOR,
                product: VIRTUAL_POINTER_PRODUCT,
                version: 1,
            },
            name,
            ff_effects_max: 0,
        };
        ioctl::ioctl_with_ref_arg(fd, ioctl::UI_DEV_SETUP, &setup, "UI_DEV_SETUP")?;
        ioctl::ioctl_no_arg(fd, ioctl::UI_DEV_CREATE, "UI_DEV_CREATE")?;
        lifecycle::track_uinput(fd);

        info!(
            "Virtual pointer created: '{}' (abs range {}x{})",
            VIRTUAL_POINTER_NAME,
            max_x + 1,
            max_y + 1
        );

        Ok(Self {
            file,
            max_x,
            max_y,
            destroyed: false,
        })
    }

    /// Destroy the device (idempotent, also run on drop)
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        lifecycle::untrack_uinput();
        match ioctl::ioctl_no_arg(self.file.as_raw_fd(), ioctl::UI_DEV_DESTROY, "UI_DEV_DESTROY") {
            Ok(()) => info!("Virtual pointer destroyed"),
            Err(e) => warn!("{}", e),
        }
    }
}

impl PointerSink for UinputPointer {
    fn emit(&mut self, action: PointerAction) -> Result<()> {
        if self.destroyed {
            return Err(anyhow!("virtual pointer already destroyed"));
        }
        let action = clamp_action(action, self.max_x, self.max_y);
        let events = encode_action(action);
        let mut buf = Vec::with_capacity(events.len() * std::mem::size_of::<libc::input_event>());
        for (ev_type, code, value) in events {
            buf.extend_from_slice(&raw_event(ev_type, code, value));
        }
        // One write per report: the reader never sees half an update
        let written = self.file.write(&buf).context("uinput write failed")?;
        if written != buf.len() {
            return Err(anyhow!("short uinput write ({} of {} bytes)", written, buf.len()));
        }
        debug!("pointer: {:?}", action);
        Ok(())
    }
}

impl Drop for UinputPointer {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn button_code(button: Button) -> u16 {
    match button {
        Button::Left => ioctl::BTN_LEFT,
        Button::Right => ioctl::BTN_RIGHT,
        Button::Middle => ioctl::BTN_MIDDLE,
    }
}

fn clamp_action(action: PointerAction, max_x: i32, max_y: i32) -> PointerAction {
    let clamp = |x: i32, y: i32| (x.clamp(0, max_x), y.clamp(0, max_y));
    match action {
        PointerAction::MoveAbsolute { x, y } => {
            let (x, y) = clamp(x, y);
            PointerAction::MoveAbsolute { x, y }
        }
        PointerAction::TouchDown { x, y } => {
            let (x, y) = clamp(x, y);
            PointerAction::TouchDown { x, y }
        }
        PointerAction::Button {
            button,
            pressed,
            at: Some((x, y)),
        } => PointerAction::Button {
            button,
            pressed,
            at: Some(clamp(x, y)),
        },
        other => other,
    }
}

/// Translate an action into (type, code, value) triples ending in SYN_REPORT
pub fn encode_action(action: PointerAction) -> Vec<(u16, u16, i32)> {
    let mut ev = Vec::with_capacity(6);
    match action {
        PointerAction::MoveRelative { dx, dy } => {
            if dx != 0 {
                ev.push((ioctl::EV_REL, ioctl::REL_X, dx));
            }
            if dy != 0 {
                ev.push((ioctl::EV_REL, ioctl::REL_Y, dy));
            }
        }
        PointerAction::MoveAbsolute { x, y } => {
            ev.push((ioctl::EV_ABS, ioctl::ABS_X, x));
            ev.push((ioctl::EV_ABS, ioctl::ABS_Y, y));
        }
        PointerAction::TouchDown { x, y } => {
            ev.push((ioctl::EV_KEY, ioctl::BTN_TOUCH, 1));
            ev.push((ioctl::EV_ABS, ioctl::ABS_X, x));
            ev.push((ioctl::EV_ABS, ioctl::ABS_Y, y));
        }
        PointerAction::TouchUp => {
            ev.push((ioctl::EV_KEY, ioctl::BTN_TOUCH, 0));
        }
        PointerAction::Button {
            button,
            pressed,
            at,
        } => {
            if let Some((x, y)) = at {
                ev.push((ioctl::EV_ABS, ioctl::ABS_X, x));
                ev.push((ioctl::EV_ABS, ioctl::ABS_Y, y));
            }
            ev.push((ioctl::EV_KEY, button_code(button), pressed as i32));
        }
        PointerAction::Scroll {
            vertical,
            horizontal,
        } => {
            if vertical.hires != 0 {
                ev.push((ioctl::EV_REL, ioctl::REL_WHEEL_HI_RES, vertical.hires));
            }
            if vertical.notches != 0 {
                ev.push((ioctl::EV_REL, ioctl::REL_WHEEL, vertical.notches));
            }
            if horizontal.hires != 0 {
                ev.push((ioctl::EV_REL, ioctl::REL_HWHEEL_HI_RES, horizontal.hires));
            }
            if horizontal.notches != 0 {
                ev.push((ioctl::EV_REL, ioctl::REL_HWHEEL, horizontal.notches));
            }
        }
    }
    ev.push((ioctl::EV_SYN, ioctl::SYN_REPORT, 0));
    ev
}

/// Serialize one struct input_event (timestamp left zero; the kernel stamps it)
fn raw_event(ev_type: u16, code: u16, value: i32) -> Vec<u8> {
    let event = libc::input_event {
        time: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        type_: ev_type,
        code,
        value,
    };
    let size = std::mem::size_of::<libc::input_event>();
    let ptr = &event as *const libc::input_event as *const u8;
    unsafe { std::slice::from_raw_parts(ptr, size) }.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::ScrollAmount;

    const SYN: (u16, u16, i32) = (ioctl::EV_SYN, ioctl::SYN_REPORT, 0);

    #[test]
    fn test_every_report_ends_with_sync() {
        let actions = [
            PointerAction::MoveRelative { dx: 3, dy: -2 },
            PointerAction::MoveAbsolute { x: 1, y: 2 },
            PointerAction::TouchDown { x: 1, y: 2 },
            PointerAction::TouchUp,
            PointerAction::Button {
                button: Button::Middle,
                pressed: true,
                at: None,
            },
            PointerAction::Scroll {
                vertical: ScrollAmount { hires: 30, notches: 0 },
                horizontal: ScrollAmount::default(),
            },
        ];
        for action in actions {
            let ev = encode_action(action);
            assert_eq!(ev.last(), Some(&SYN), "{:?}", action);
            assert_eq!(ev.iter().filter(|e| **e == SYN).count(), 1);
        }
    }

    #[test]
    fn test_positioned_click() {
        let ev = encode_action(PointerAction::Button {
            button: Button::Left,
            pressed: true,
            at: Some((40, 1300)),
        });
        assert_eq!(
            ev,
            vec![
                (ioctl::EV_ABS, ioctl::ABS_X, 40),
                (ioctl::EV_ABS, ioctl::ABS_Y, 1300),
                (ioctl::EV_KEY, ioctl::BTN_LEFT, 1),
                SYN,
            ]
        );
    }

    #[test]
    fn test_scroll_emits_hires_and_notches() {
        let ev = encode_action(PointerAction::Scroll {
            vertical: ScrollAmount {
                hires: 240,
                notches: 2,
            },
            horizontal: ScrollAmount {
                hires: -20,
                notches: 0,
            },
        });
        assert_eq!(
            ev,
            vec![
                (ioctl::EV_REL, ioctl::REL_WHEEL_HI_RES, 240),
                (ioctl::EV_REL, ioctl::REL_WHEEL, 2),
                (ioctl::EV_REL, ioctl::REL_HWHEEL_HI_RES, -20),
                SYN,
            ]
        );
    }

    #[test]
    fn test_clamp_to_desktop() {
        let a = clamp_action(PointerAction::MoveAbsolute { x: -5, y: 9000 }, 719, 2559);
        assert_eq!(a, PointerAction::MoveAbsolute { x: 0, y: 2559 });
        let r = clamp_action(PointerAction::MoveRelative { dx: -5, dy: 9000 }, 719, 2559);
        assert_eq!(r, PointerAction::MoveRelative { dx: -5, dy: 9000 });
    }

    #[test]
    fn test_raw_event_size() {
        assert_eq!(
            raw_event(ioctl::EV_KEY, ioctl::BTN_LEFT, 1).len(),
            std::mem::size_of::<libc::input_event>()
        );
    }

    #[test]
    #[ignore]
    fn test_create_device() {
        // Needs write access to /dev/uinput
        let mut p = UinputPointer::new(1023, 1023).unwrap();
        p.emit(PointerAction::MoveRelative { dx: 1, dy: 1 }).unwrap();
    }
}
