//! Process lifecycle
//!
//! Signal-driven shutdown flag polled by the event loop, and a panic hook
//! that releases exclusive device grabs and destroys the virtual pointer.
//! With `panic = "abort"` no destructors run, so the hook is the only
//! cleanup a panic gets.

use log::debug;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;

use crate::device::ioctl;

/// Global flag for shutdown requested via signal (SIGTERM/SIGINT/SIGHUP)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Grabbed evdev fds, released by the panic hook
static GRABBED_FDS: Mutex<Vec<RawFd>> = Mutex::new(Vec::new());

/// uinput fd of the virtual pointer (-1 = none)
static UINPUT_FD: AtomicI32 = AtomicI32::new(-1);

/// Check if shutdown was requested (SIGTERM, SIGINT, or SIGHUP)
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Set up signal handlers for graceful shutdown (call once at startup)
///
/// Handles SIGTERM (systemd stop), SIGINT (Ctrl+C), and SIGHUP (terminal hangup).
/// SIGPIPE is ignored so a vanished broker client surfaces as EPIPE.
pub fn setup_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGHUP,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

extern "C" fn shutdown_signal_handler(_signo: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// Remember a grabbed fd for panic recovery
pub fn track_grab(fd: RawFd) {
    if let Ok(mut fds) = GRABBED_FDS.lock() {
        if !fds.contains(&fd) {
            fds.push(fd);
        }
    }
}

/// Forget a fd whose grab was released normally
pub fn untrack_grab(fd: RawFd) {
    if let Ok(mut fds) = GRABBED_FDS.lock() {
        fds.retain(|&f| f != fd);
    }
}

pub fn track_uinput(fd: RawFd) {
    UINPUT_FD.store(fd, Ordering::Relaxed);
}

pub fn untrack_uinput() {
    UINPUT_FD.store(-1, Ordering::Relaxed);
}

/// Install a panic hook that releases grabs and the virtual pointer.
///
/// Even with `panic = "abort"`, `std::panic::set_hook` runs before the abort.
pub fn setup_panic_hook() {
    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        // try_lock: the panic may have happened while the lock was held
        if let Ok(fds) = GRABBED_FDS.try_lock() {
            for &fd in fds.iter() {
                let _ = ioctl::set_grab(fd, false);
            }
        }
        let fd = UINPUT_FD.swap(-1, Ordering::Relaxed);
        if fd >= 0 {
            let _ = ioctl::ioctl_no_arg(fd, ioctl::UI_DEV_DESTROY, "UI_DEV_DESTROY");
        }
        eprintln!("[touchmux] PANIC: {}", info);
        prev(info);
    }));
    debug!("Panic hook installed");
}
