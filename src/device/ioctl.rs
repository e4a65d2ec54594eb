//! Safe wrappers for evdev and uinput ioctl calls
//!
//! Kernel constants from <linux/input.h>, <linux/input-event-codes.h> and
//! <linux/uinput.h>, plus error-handling wrappers that keep unsafe
//! boilerplate out of the registry and the virtual pointer.

use anyhow::{anyhow, Result};
use std::os::unix::io::RawFd;

// ============================================================================
// Event Types and Codes
// ============================================================================

pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;

pub const SYN_REPORT: u16 = 0;
pub const SYN_DROPPED: u16 = 3;

pub const ABS_X: u16 = 0x00;
pub const ABS_Y: u16 = 0x01;
pub const ABS_MT_SLOT: u16 = 0x2f;
pub const ABS_MT_POSITION_X: u16 = 0x35;
pub const ABS_MT_POSITION_Y: u16 = 0x36;
pub const ABS_MT_TRACKING_ID: u16 = 0x39;
pub const ABS_MAX: u16 = 0x3f;

pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;
pub const REL_HWHEEL: u16 = 0x06;
pub const REL_WHEEL: u16 = 0x08;
pub const REL_WHEEL_HI_RES: u16 = 0x0b;
pub const REL_HWHEEL_HI_RES: u16 = 0x0c;

pub const BTN_LEFT: u16 = 0x110;
pub const BTN_RIGHT: u16 = 0x111;
pub const BTN_MIDDLE: u16 = 0x112;
pub const BTN_TOUCH: u16 = 0x14a;
pub const KEY_MAX: u16 = 0x2ff;

pub const INPUT_PROP_DIRECT: u16 = 0x01;
pub const INPUT_PROP_MAX: u16 = 0x1f;

pub const BUS_USB: u16 = 0x03;

// ============================================================================
// Request Encoding (asm-generic/ioctl.h)
// ============================================================================

const IOC_NONE: libc::c_ulong = 0;
const IOC_WRITE: libc::c_ulong = 1;
const IOC_READ: libc::c_ulong = 2;

const fn ioc(dir: libc::c_ulong, ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    (dir << 30) | ((size as libc::c_ulong) << 16) | ((ty as libc::c_ulong) << 8) | nr as libc::c_ulong
}

/// EVIOCGRAB: _IOW('E', 0x90, int)
pub const EVIOCGRAB: libc::c_ulong = ioc(IOC_WRITE, b'E', 0x90, std::mem::size_of::<libc::c_int>());

/// EVIOCGNAME(len)
pub const fn eviocgname(len: usize) -> libc::c_ulong {
    ioc(IOC_READ, b'E', 0x06, len)
}

/// EVIOCGPROP(len)
pub const fn eviocgprop(len: usize) -> libc::c_ulong {
    ioc(IOC_READ, b'E', 0x09, len)
}

/// EVIOCGMTSLOTS(len)
pub const fn eviocgmtslots(len: usize) -> libc::c_ulong {
    ioc(IOC_READ, b'E', 0x0a, len)
}

/// EVIOCGBIT(ev, len)
pub const fn eviocgbit(ev: u16, len: usize) -> libc::c_ulong {
    ioc(IOC_READ, b'E', 0x20 + ev as u8, len)
}

/// EVIOCGABS(abs)
pub const fn eviocgabs(abs: u16) -> libc::c_ulong {
    ioc(IOC_READ, b'E', 0x40 + abs as u8, std::mem::size_of::<InputAbsInfo>())
}

pub const UI_DEV_CREATE: libc::c_ulong = ioc(IOC_NONE, b'U', 1, 0);
pub const UI_DEV_DESTROY: libc::c_ulong = ioc(IOC_NONE, b'U', 2, 0);
pub const UI_DEV_SETUP: libc::c_ulong = ioc(IOC_WRITE, b'U', 3, std::mem::size_of::<UinputSetup>());
pub const UI_ABS_SETUP: libc::c_ulong =
    ioc(IOC_WRITE, b'U', 4, std::mem::size_of::<UinputAbsSetup>());
pub const UI_SET_EVBIT: libc::c_ulong = ioc(IOC_WRITE, b'U', 100, std::mem::size_of::<libc::c_int>());
pub const UI_SET_KEYBIT: libc::c_ulong = ioc(IOC_WRITE, b'U', 101, std::mem::size_of::<libc::c_int>());
pub const UI_SET_RELBIT: libc::c_ulong = ioc(IOC_WRITE, b'U', 102, std::mem::size_of::<libc::c_int>());
pub const UI_SET_ABSBIT: libc::c_ulong = ioc(IOC_WRITE, b'U', 103, std::mem::size_of::<libc::c_int>());

// ============================================================================
// Kernel Structures
// ============================================================================

/// struct input_absinfo
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputAbsInfo {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

/// struct input_id
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct InputId {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

/// struct uinput_setup
#[repr(C)]
#[derive(Clone, Copy)]
pub struct UinputSetup {
    pub id: InputId,
    pub name: [u8; 80],
    pub ff_effects_max: u32,
}

/// struct uinput_abs_setup
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UinputAbsSetup {
    pub code: u16,
    pub absinfo: InputAbsInfo,
}

// ============================================================================
// Raw Wrappers
// ============================================================================

/// Execute an ioctl command that takes no argument.
///
/// # Arguments
/// * `fd` - File descriptor
/// * `cmd` - ioctl command number
/// * `cmd_name` - Human-readable name for error messages
pub fn ioctl_no_arg(fd: RawFd, cmd: libc::c_ulong, cmd_name: &str) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, cmd) };
    if ret < 0 {
        Err(anyhow!(
            "{} failed on fd {}: {}",
            cmd_name,
            fd,
            std::io::Error::last_os_error()
        ))
    } else {
        Ok(())
    }
}

/// Execute an ioctl command that fills a caller-provided buffer.
///
/// Returns the ioctl return value (bytes copied for string/bitmap queries).
pub fn ioctl_read_buf(fd: RawFd, cmd: libc::c_ulong, buf: &mut [u8], cmd_name: &str) -> Result<usize> {
    let ret = unsafe { libc::ioctl(fd, cmd, buf.as_mut_ptr()) };
    if ret < 0 {
        Err(anyhow!(
            "{} failed on fd {}: {}",
            cmd_name,
            fd,
            std::io::Error::last_os_error()
        ))
    } else {
        Ok(ret as usize)
    }
}

/// Execute an ioctl command with a mutable argument.
///
/// The caller must ensure the argument type matches what the ioctl expects.
pub fn ioctl_with_mut_arg<T>(
    fd: RawFd,
    cmd: libc::c_ulong,
    arg: &mut T,
    cmd_name: &str,
) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, cmd, arg as *mut T) };
    if ret < 0 {
        Err(anyhow!(
            "{} failed on fd {}: {}",
            cmd_name,
            fd,
            std::io::Error::last_os_error()
        ))
    } else {
        Ok(())
    }
}

/// Execute an ioctl command with a const argument (passed by reference).
pub fn ioctl_with_ref_arg<T>(fd: RawFd, cmd: libc::c_ulong, arg: &T, cmd_name: &str) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, cmd, arg as *const T) };
    if ret < 0 {
        Err(anyhow!(
            "{} failed on fd {}: {}",
            cmd_name,
            fd,
            std::io::Error::last_os_error()
        ))
    } else {
        Ok(())
    }
}

/// Execute an ioctl command with an integer argument.
pub fn ioctl_with_int_arg(
    fd: RawFd,
    cmd: libc::c_ulong,
    arg: libc::c_int,
    cmd_name: &str,
) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, cmd, arg) };
    if ret < 0 {
        Err(anyhow!(
            "{} failed on fd {}: {}",
            cmd_name,
            fd,
            std::io::Error::last_os_error()
        ))
    } else {
        Ok(())
    }
}

// ============================================================================
// evdev Queries
// ============================================================================

/// Acquire (`true`) or release (`false`) exclusive access to an evdev node
pub fn set_grab(fd: RawFd, grab: bool) -> Result<()> {
    ioctl_with_int_arg(fd, EVIOCGRAB, grab as libc::c_int, "EVIOCGRAB")
}

/// Device name as reported by the driver
pub fn query_name(fd: RawFd) -> Result<String> {
    let mut buf = [0u8; 256];
    ioctl_read_buf(fd, eviocgname(buf.len()), &mut buf, "EVIOCGNAME")?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Supported codes for one event type, as a kernel bitmap
pub fn query_bits(fd: RawFd, ev_type: u16, max_code: u16) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; max_code as usize / 8 + 1];
    let len = buf.len();
    ioctl_read_buf(fd, eviocgbit(ev_type, len), &mut buf, "EVIOCGBIT")?;
    Ok(buf)
}

/// Input properties bitmap (INPUT_PROP_*)
pub fn query_props(fd: RawFd) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; INPUT_PROP_MAX as usize / 8 + 1];
    let len = buf.len();
    ioctl_read_buf(fd, eviocgprop(len), &mut buf, "EVIOCGPROP")?;
    Ok(buf)
}

/// Axis range for one absolute axis
pub fn query_abs(fd: RawFd, code: u16) -> Result<InputAbsInfo> {
    let mut info = InputAbsInfo::default();
    ioctl_with_mut_arg(fd, eviocgabs(code), &mut info, "EVIOCGABS")?;
    Ok(info)
}

/// Current per-slot values of one multi-touch axis
pub fn query_mt_slots(fd: RawFd, code: u16, slots: usize) -> Result<Vec<i32>> {
    // struct input_mt_request_layout { __u32 code; __s32 values[num_slots]; }
    let mut req = vec![0i32; slots + 1];
    req[0] = code as i32;
    let bytes = req.len() * std::mem::size_of::<i32>();
    let ret = unsafe { libc::ioctl(fd, eviocgmtslots(bytes), req.as_mut_ptr()) };
    if ret < 0 {
        return Err(anyhow!(
            "EVIOCGMTSLOTS failed on fd {}: {}",
            fd,
            std::io::Error::last_os_error()
        ));
    }
    Ok(req[1..].to_vec())
}

/// Check a bit in a kernel bitmap
#[inline]
pub fn test_bit(bits: &[u8], bit: u16) -> bool {
    bits.get(bit as usize / 8)
        .map(|b| b & (1 << (bit % 8)) != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes_match_kernel_headers() {
        assert_eq!(EVIOCGRAB, 0x4004_4590);
        assert_eq!(eviocgname(256), 0x8100_4506);
        assert_eq!(eviocgabs(ABS_MT_POSITION_X), 0x8018_4575);
        assert_eq!(UI_DEV_CREATE, 0x5501);
        assert_eq!(UI_DEV_DESTROY, 0x5502);
        assert_eq!(UI_SET_EVBIT, 0x4004_5564);
        assert_eq!(UI_DEV_SETUP, 0x405c_5503);
        assert_eq!(UI_ABS_SETUP, 0x401c_5504);
    }

    #[test]
    fn test_struct_layouts() {
        assert_eq!(std::mem::size_of::<InputAbsInfo>(), 24);
        assert_eq!(std::mem::size_of::<UinputSetup>(), 92);
        assert_eq!(std::mem::size_of::<UinputAbsSetup>(), 28);
    }

    #[test]
    fn test_bit_lookup() {
        let bits = [0b0000_0001u8, 0b1000_0000];
        assert!(test_bit(&bits, 0));
        assert!(!test_bit(&bits, 1));
        assert!(test_bit(&bits, 15));
        assert!(!test_bit(&bits, 200));
    }
}
