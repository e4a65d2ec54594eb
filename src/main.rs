//! touchmux - touchscreen arbitration daemon
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │         Event Loop (poll, 10 ms)         │
//! ├──────────────────────────────────────────┤
//! │  Touch devices (evdev, grabbed)          │
//! │                ↓                         │
//! │  Gesture engine ← region table ← broker  │
//! │        ↓                    ↓            │
//! │  Virtual pointer (uinput)  Broker client │
//! └──────────────────────────────────────────┘
//! ```

mod broker;
mod config;
mod constants;
mod device;
mod gesture;
mod lifecycle;
mod pointer;
mod utils;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use nix::poll::{poll, PollFd, PollFlags};
use std::os::unix::io::BorrowedFd;
use std::time::Instant;

use broker::{Broker, ClientId, RegionTable};
use config::Config;
use device::{DeviceId, DeviceRegistry, DeviceStatus, TouchFrame};
use gesture::{EngineOutput, GestureEngine, ScreenLayout};
use pointer::{PointerSink, UinputPointer};

#[cfg(target_os = "linux")]
use device::{HotplugEvent, HotplugMonitor};
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

fn print_help() {
    println!(
        r#"touchmux {} - touchscreen gestures and region broker

USAGE:
    touchmux [OPTIONS]

OPTIONS:
    -h, --help                 Print this help message
    -V, --version              Print version information
    -d, --debug                Verbose diagnostics on stderr
    --init-config[=system]     Generate a config file (user, or /etc with =system)
    -f, --force                Overwrite an existing config file

GESTURES:
    tap                 left click
    hold 500 ms         right click
    drag                pointer motion
    two fingers         scroll

CONFIG FILE:
    ~/.config/touchmux/config.toml (or $TOUCHMUX_CONFIG, /etc/touchmux/config.toml)

Requires read access to /dev/input/event* and write access to /dev/uinput.
"#,
        env!("CARGO_PKG_VERSION")
    );
}

/// Something the event loop waits on
#[derive(Debug, Clone, Copy)]
enum Source {
    #[cfg(target_os = "linux")]
    Hotplug,
    Listener,
    Device(DeviceId),
    Client(ClientId),
}

/// Everything the event loop owns
struct Daemon {
    config: Config,
    registry: DeviceRegistry,
    pointer: UinputPointer,
    broker: Option<Broker>,
    /// Stand-in region table when the broker could not start
    no_regions: RegionTable,
    engine: GestureEngine,
    #[cfg(target_os = "linux")]
    hotplug: Option<HotplugMonitor>,
    #[cfg(target_os = "linux")]
    config_watcher: Option<config::ConfigWatcher>,
    outputs: Vec<EngineOutput>,
}

impl Daemon {
    /// Open devices, create the virtual pointer and start the broker.
    /// Fails only when no touchscreen is usable or uinput is unavailable.
    fn start(config: Config) -> Result<Self> {
        let mut registry = DeviceRegistry::new(config.devices.clone());
        let found = registry.scan()?;
        if found == 0 {
            bail!("No compatible touchscreen found");
        }
        info!("Found {} touchscreen(s)", found);

        let first_axis_max = registry.iter().find_map(|(_, d)| d.axis_max());
        let layout = ScreenLayout::resolve(&config.screen, first_axis_max, registry.count());
        let (max_x, max_y) = layout.desktop_max();
        info!(
            "Desktop: {} screen(s) of {}x{} (pointer range 0..={}, 0..={})",
            layout.count, layout.width, layout.height, max_x, max_y
        );

        let pointer =
            UinputPointer::new(max_x, max_y).context("Failed to create virtual pointer")?;

        let broker = match Broker::bind(&config.broker) {
            Ok(broker) => Some(broker),
            Err(e) => {
                warn!("Region broker disabled: {:#}", e);
                None
            }
        };

        #[cfg(target_os = "linux")]
        let hotplug = if config.devices.hotplug {
            match HotplugMonitor::new() {
                Ok(monitor) => Some(monitor),
                Err(e) => {
                    warn!("Hotplug disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        #[cfg(target_os = "linux")]
        let config_watcher =
            Config::config_path().and_then(|path| config::ConfigWatcher::new(&path).ok());
        #[cfg(target_os = "linux")]
        if config_watcher.is_some() {
            info!("Config hot-reload enabled");
        }

        let engine = GestureEngine::new(config.gesture.clone(), layout);

        Ok(Self {
            config,
            registry,
            pointer,
            broker,
            no_regions: RegionTable::new(),
            engine,
            #[cfg(target_os = "linux")]
            hotplug,
            #[cfg(target_os = "linux")]
            config_watcher,
            outputs: Vec::new(),
        })
    }

    fn run(&mut self) -> Result<()> {
        info!("Event loop started");
        while !lifecycle::shutdown_requested() {
            self.engine.tick(Instant::now(), &mut self.outputs);
            self.deliver();

            let ready = self.wait(self.engine.params().tick_ms.max(1))?;
            let now = Instant::now();

            #[cfg(target_os = "linux")]
            self.check_config_reload();

            for source in ready {
                match source {
                    #[cfg(target_os = "linux")]
                    Source::Hotplug => self.handle_hotplug(now),
                    Source::Device(id) => self.read_device(id, now),
                    Source::Listener => {
                        if let Some(broker) = self.broker.as_mut() {
                            broker.accept();
                        }
                    }
                    Source::Client(id) => {
                        if let Some(broker) = self.broker.as_mut() {
                            broker.read_client(id);
                        }
                    }
                }
            }
        }
        info!("Shutdown requested");
        Ok(())
    }

    /// Wait for readable descriptors, at most `timeout_ms`
    fn wait(&self, timeout_ms: u64) -> Result<Vec<Source>> {
        let mut sources = Vec::new();
        let mut fds: Vec<BorrowedFd<'_>> = Vec::new();

        #[cfg(target_os = "linux")]
        if let Some(monitor) = &self.hotplug {
            sources.push(Source::Hotplug);
            // SAFETY: the monitor outlives this call
            fds.push(unsafe { BorrowedFd::borrow_raw(monitor.as_raw_fd()) });
        }
        for (id, fd) in self.registry.poll_sources() {
            sources.push(Source::Device(id));
            fds.push(fd);
        }
        if let Some(broker) = &self.broker {
            sources.push(Source::Listener);
            fds.push(broker.listener_fd());
            for (id, fd) in broker.poll_sources() {
                sources.push(Source::Client(id));
                fds.push(fd);
            }
        }

        let mut poll_fds: Vec<PollFd<'_>> = fds
            .iter()
            .map(|fd| PollFd::new(fd, PollFlags::POLLIN))
            .collect();
        match poll(&mut poll_fds, timeout_ms as libc::c_int) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Ok(Vec::new()),
            Err(e) => return Err(anyhow!("poll failed: {}", e)),
        }

        let wake = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        Ok(poll_fds
            .iter()
            .zip(sources)
            .filter(|(p, _)| p.revents().map_or(false, |r| r.intersects(wake)))
            .map(|(_, s)| s)
            .collect())
    }

    fn read_device(&mut self, id: DeviceId, now: Instant) {
        let mut frames = Vec::new();
        if self.registry.read(id, &mut frames) == DeviceStatus::Gone {
            frames.extend(self.registry.remove(id));
        }
        self.process_frames(&frames, now);
    }

    fn process_frames(&mut self, frames: &[TouchFrame], now: Instant) {
        let regions = match &self.broker {
            Some(broker) => broker.regions(),
            None => &self.no_regions,
        };
        for frame in frames {
            self.engine.process_frame(frame, regions, now, &mut self.outputs);
        }
        self.deliver();
    }

    /// Route engine output to the virtual pointer or a region owner
    fn deliver(&mut self) {
        for output in std::mem::take(&mut self.outputs) {
            match output {
                EngineOutput::Pointer(action) => {
                    if let Err(e) = self.pointer.emit(action) {
                        warn!("Pointer report dropped: {:#}", e);
                    }
                }
                EngineOutput::Region { owner, touch } => {
                    let sent = self
                        .broker
                        .as_mut()
                        .map_or(false, |broker| broker.forward(owner, touch));
                    if !sent {
                        debug!("Client {} gone, touch for region {} dropped", owner, touch.region_id);
                    }
                }
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn handle_hotplug(&mut self, now: Instant) {
        let Some(monitor) = self.hotplug.as_mut() else {
            return;
        };
        for event in monitor.poll() {
            match event {
                HotplugEvent::Added(path) => match self.registry.add_device(&path) {
                    Ok(Some(id)) => {
                        let layout = self.engine.layout();
                        if let Some(dev) = self.registry.get(id) {
                            if dev.screen_index >= layout.count {
                                warn!(
                                    "{:?} maps to screen {} outside the {}-screen desktop",
                                    path, dev.screen_index, layout.count
                                );
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Hotplugged {:?} not usable: {:#}", path, e),
                },
                HotplugEvent::Removed(path) => {
                    if let Some(frame) = self.registry.remove_by_path(&path) {
                        self.process_frames(&[frame], now);
                    }
                }
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn check_config_reload(&mut self) {
        let changed = self
            .config_watcher
            .as_ref()
            .map_or(false, |watcher| watcher.check_reload());
        if !changed {
            return;
        }

        info!("Config file change detected, reloading...");
        let new_cfg = Config::load();
        if new_cfg.screen != self.config.screen
            || new_cfg.devices != self.config.devices
            || new_cfg.broker != self.config.broker
        {
            info!("Only [gesture] is applied at runtime; restart for other changes");
        }
        self.engine.set_params(new_cfg.gesture.clone());
        self.config.gesture = new_cfg.gesture;
        info!("Config reload complete");
    }

    /// Release grabs, destroy the virtual pointer and remove the socket
    fn shutdown(mut self) {
        self.registry.cleanup();
        self.pointer.destroy();
        drop(self.broker.take());
        info!("touchmux stopped");
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let debug = args.iter().any(|a| a == "--debug" || a == "-d");
    let default_filter = if debug { "warn,touchmux=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    // --help
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // --version
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("touchmux {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // --init-config or --init-config=system
    if let Some(arg) = args.iter().find(|a| a.starts_with("--init-config")) {
        let target = arg.split_once('=').map_or("user", |(_, t)| t);
        let force = args.iter().any(|a| a == "--force" || a == "-f");
        match Config::write_template(target, force) {
            Ok(path) => {
                println!("Config file generated: {}", path.display());
                return Ok(());
            }
            Err(e) => {
                eprintln!("Failed to generate config: {:#}", e);
                return Err(e);
            }
        }
    }

    info!("touchmux {} starting...", env!("CARGO_PKG_VERSION"));

    lifecycle::setup_signal_handlers();
    lifecycle::setup_panic_hook();

    let cfg = Config::load();
    let mut daemon = Daemon::start(cfg)?;

    // Notify systemd that we're ready
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

    let result = daemon.run();

    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
    daemon.shutdown();
    result
}
