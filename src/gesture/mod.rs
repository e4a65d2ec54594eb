//! Gesture engine
//!
//! One state machine shared by every touchscreen. Frames from the device
//! registry are first checked against the broker's region table; touches
//! that land in a claimed region belong to that region until they lift.
//! Everything else is classified into taps, drags, long-presses and
//! two-finger scrolls and turned into pointer actions.
//!
//! The engine does no I/O. Time comes in as an `Instant` and results go
//! out through an [`EngineOutput`] buffer, so the main loop decides where
//! each action is delivered.

pub mod layout;
pub mod scroll;

use log::debug;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::broker::{ClientId, RegionTable, TouchMessage, TouchPhase};
use crate::config::{DragMode, GestureConfig};
use crate::constants::MAX_SLOTS;
use crate::device::{Contact, ContactPhase, DeviceId, TouchFrame};
use crate::pointer::{Button, PointerAction};

pub use layout::ScreenLayout;
use scroll::{ScrollAccumulator, ScrollCurve};

/// A physical finger: device plus hardware slot
pub type TouchKey = (DeviceId, usize);

/// Where a classified event goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutput {
    Pointer(PointerAction),
    Region { owner: ClientId, touch: TouchMessage },
}

/// Externally visible classifier state
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
    Idle,
    PendingClassify,
    Drag,
    LongPressFired,
    Scroll,
    /// Only region-owned touches are down
    RegionIntercept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Point {
    x: i32,
    y: i32,
}

impl Point {
    fn distance_sq(self, other: Point) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }
}

/// A touch owned by a broker region
#[derive(Debug, Clone, Copy)]
struct Intercept {
    region_id: i32,
    owner: ClientId,
    /// Region origin, screen-relative
    origin: Point,
    /// Cleared once the region disappears; the rest of the touch is swallowed
    live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragKind {
    Relative,
    Absolute,
    /// Tap-drag: relative motion with the left button held
    ButtonHeld,
}

#[derive(Debug, Clone, Copy)]
struct ScrollFinger {
    key: TouchKey,
    last: Point,
    current: Point,
}

#[derive(Debug, Clone)]
enum State {
    Idle,
    Pending {
        key: TouchKey,
        down_at: Instant,
        down: Point,
        last: Point,
    },
    Drag {
        key: TouchKey,
        kind: DragKind,
        last: Point,
    },
    LongPress {
        key: TouchKey,
    },
    Scroll {
        fingers: Vec<ScrollFinger>,
        last_at: Instant,
    },
}

pub struct GestureEngine {
    params: GestureConfig,
    layout: ScreenLayout,
    state: State,
    intercepts: HashMap<TouchKey, Intercept>,
    /// Extra fingers that take no part in the current gesture
    ignored: HashSet<TouchKey>,
    scroll: ScrollAccumulator,
    last_tap: Option<Instant>,
}

impl GestureEngine {
    pub fn new(params: GestureConfig, layout: ScreenLayout) -> Self {
        Self {
            params,
            layout,
            state: State::Idle,
            intercepts: HashMap::new(),
            ignored: HashSet::new(),
            scroll: ScrollAccumulator::default(),
            last_tap: None,
        }
    }

    /// Swap thresholds at runtime (config reload). A gesture in progress
    /// keeps its current state.
    pub fn set_params(&mut self, params: GestureConfig) {
        self.params = params;
    }

    pub fn params(&self) -> &GestureConfig {
        &self.params
    }

    pub fn layout(&self) -> ScreenLayout {
        self.layout
    }

    #[cfg(test)]
    pub fn phase(&self) -> GesturePhase {
        match self.state {
            State::Idle if !self.intercepts.is_empty() => GesturePhase::RegionIntercept,
            State::Idle => GesturePhase::Idle,
            State::Pending { .. } => GesturePhase::PendingClassify,
            State::Drag { .. } => GesturePhase::Drag,
            State::LongPress { .. } => GesturePhase::LongPressFired,
            State::Scroll { .. } => GesturePhase::Scroll,
        }
    }

    /// Evaluate the long-press timer
    pub fn tick(&mut self, now: Instant, out: &mut Vec<EngineOutput>) {
        if let State::Pending {
            key,
            down_at,
            last,
            ..
        } = self.state
        {
            let hold = Duration::from_millis(self.params.long_press_ms);
            if now.saturating_duration_since(down_at) >= hold {
                debug!("gesture: long press at {:?}", last);
                pointer(
                    out,
                    PointerAction::Button {
                        button: Button::Right,
                        pressed: true,
                        at: Some((last.x, last.y)),
                    },
                );
                self.state = State::LongPress { key };
            }
        }
    }

    /// Consume one synchronized frame from a device
    pub fn process_frame(
        &mut self,
        frame: &TouchFrame,
        regions: &RegionTable,
        now: Instant,
        out: &mut Vec<EngineOutput>,
    ) {
        // A timer that elapsed since the last tick wins over this frame
        self.tick(now, out);

        for contact in &frame.contacts {
            self.process_contact(frame, contact, regions, now, out);
        }
        self.flush_scroll(now, out);
    }

    fn process_contact(
        &mut self,
        frame: &TouchFrame,
        contact: &Contact,
        regions: &RegionTable,
        now: Instant,
        out: &mut Vec<EngineOutput>,
    ) {
        let screen_index = frame.screen_index;
        let key = (frame.device, contact.slot);
        let (lx, ly) = self.layout.to_logical(screen_index, contact.x, contact.y);
        let pos = Point { x: lx, y: ly };

        if self.intercepts.contains_key(&key) {
            self.intercepted(key, contact, pos, regions, out);
            return;
        }

        match contact.phase {
            ContactPhase::Down => {
                if let Some(region) = regions.lookup(screen_index, contact.x, contact.y) {
                    debug!("gesture: touch {:?} intercepted by region {}", key, region.id);
                    self.intercepts.insert(
                        key,
                        Intercept {
                            region_id: region.id,
                            owner: region.owner,
                            origin: Point {
                                x: region.rect.x,
                                y: region.rect.y,
                            },
                            live: true,
                        },
                    );
                    self.intercepted(key, contact, pos, regions, out);
                } else {
                    self.touch_down(key, pos, now, out);
                }
            }
            _ if self.ignored.contains(&key) => {
                if contact.phase == ContactPhase::Up {
                    self.ignored.remove(&key);
                }
            }
            ContactPhase::Move => self.touch_move(key, pos, out),
            ContactPhase::Up => self.touch_up(key, now, frame.released, out),
        }
    }

    /// Forward a region-owned touch, or swallow it if the region is gone
    fn intercepted(
        &mut self,
        key: TouchKey,
        contact: &Contact,
        pos: Point,
        regions: &RegionTable,
        out: &mut Vec<EngineOutput>,
    ) {
        let Some(ic) = self.intercepts.get_mut(&key) else {
            return;
        };
        if ic.live && !regions.is_owned_by(ic.region_id, ic.owner) {
            debug!("gesture: region {} gone, swallowing touch {:?}", ic.region_id, key);
            ic.live = false;
        }

        if ic.live {
            let phase = match contact.phase {
                ContactPhase::Down => TouchPhase::Down,
                ContactPhase::Move => TouchPhase::Move,
                ContactPhase::Up => TouchPhase::Up,
            };
            out.push(EngineOutput::Region {
                owner: ic.owner,
                touch: TouchMessage {
                    phase,
                    region_id: ic.region_id,
                    touch_id: touch_id(key),
                    x: contact.x - ic.origin.x,
                    y: contact.y - ic.origin.y,
                    abs_x: pos.x,
                    abs_y: pos.y,
                },
            });
        }

        if contact.phase == ContactPhase::Up {
            self.intercepts.remove(&key);
        }
    }

    fn touch_down(&mut self, key: TouchKey, pos: Point, now: Instant, out: &mut Vec<EngineOutput>) {
        match self.state {
            State::Idle => {
                let window = Duration::from_millis(self.params.double_tap_ms);
                let tap_drag = self.params.tap_drag
                    && self
                        .last_tap
                        .map_or(false, |t| now.saturating_duration_since(t) <= window);
                self.last_tap = None;

                if tap_drag {
                    debug!("gesture: tap-drag");
                    pointer(
                        out,
                        PointerAction::Button {
                            button: Button::Left,
                            pressed: true,
                            at: Some((pos.x, pos.y)),
                        },
                    );
                    self.state = State::Drag {
                        key,
                        kind: DragKind::ButtonHeld,
                        last: pos,
                    };
                } else {
                    self.state = State::Pending {
                        key,
                        down_at: now,
                        down: pos,
                        last: pos,
                    };
                }
            }
            State::Pending { key: first, last, .. } => {
                self.start_scroll(first, last, key, pos, now);
            }
            State::Drag {
                key: first,
                kind,
                last,
            } => {
                end_drag(kind, out);
                self.start_scroll(first, last, key, pos, now);
            }
            State::LongPress { .. } | State::Scroll { .. } => {
                self.ignored.insert(key);
            }
        }
    }

    fn start_scroll(&mut self, first: TouchKey, first_pos: Point, second: TouchKey, pos: Point, now: Instant) {
        debug!("gesture: scroll");
        self.scroll.reset();
        self.state = State::Scroll {
            fingers: vec![
                ScrollFinger {
                    key: first,
                    last: first_pos,
                    current: first_pos,
                },
                ScrollFinger {
                    key: second,
                    last: pos,
                    current: pos,
                },
            ],
            last_at: now,
        };
    }

    fn touch_move(&mut self, key: TouchKey, pos: Point, out: &mut Vec<EngineOutput>) {
        match &mut self.state {
            State::Pending {
                key: k, down, last, ..
            } if *k == key => {
                *last = pos;
                let threshold = self.params.move_threshold_px as i64;
                if pos.distance_sq(*down) > threshold * threshold {
                    let down = *down;
                    let kind = match self.params.drag_mode {
                        DragMode::Relative => DragKind::Relative,
                        DragMode::Absolute => DragKind::Absolute,
                    };
                    debug!("gesture: drag ({:?})", kind);
                    match kind {
                        DragKind::Absolute => {
                            pointer(out, PointerAction::TouchDown { x: down.x, y: down.y });
                            pointer(out, PointerAction::MoveAbsolute { x: pos.x, y: pos.y });
                        }
                        _ => relative(out, down, pos),
                    }
                    self.state = State::Drag {
                        key,
                        kind,
                        last: pos,
                    };
                }
            }
            State::Drag { key: k, kind, last } if *k == key => {
                match kind {
                    DragKind::Absolute => pointer(out, PointerAction::MoveAbsolute { x: pos.x, y: pos.y }),
                    _ => relative(out, *last, pos),
                }
                *last = pos;
            }
            State::Scroll { fingers, .. } => {
                if let Some(f) = fingers.iter_mut().find(|f| f.key == key) {
                    f.current = pos;
                }
            }
            _ => {}
        }
    }

    /// Lift a finger. `released` means the device vanished: an
    /// unclassified touch then ends without a click.
    fn touch_up(&mut self, key: TouchKey, now: Instant, released: bool, out: &mut Vec<EngineOutput>) {
        match &mut self.state {
            State::Pending { key: k, .. } if *k == key && released => {
                debug!("gesture: touch {:?} dropped with its device", key);
                self.state = State::Idle;
            }
            State::Pending { key: k, down, .. } if *k == key => {
                let at = Some((down.x, down.y));
                debug!("gesture: tap at {:?}", at);
                for pressed in [true, false] {
                    pointer(
                        out,
                        PointerAction::Button {
                            button: Button::Left,
                            pressed,
                            at,
                        },
                    );
                }
                self.last_tap = Some(now);
                self.state = State::Idle;
            }
            State::Drag { key: k, kind, .. } if *k == key => {
                end_drag(*kind, out);
                self.state = State::Idle;
            }
            State::LongPress { key: k } if *k == key => {
                pointer(
                    out,
                    PointerAction::Button {
                        button: Button::Right,
                        pressed: false,
                        at: None,
                    },
                );
                self.state = State::Idle;
            }
            State::Scroll { fingers, .. } => {
                fingers.retain(|f| f.key != key);
                if fingers.is_empty() {
                    self.state = State::Idle;
                }
            }
            _ => {}
        }
    }

    /// Turn the frame's two-finger motion into one scroll report
    fn flush_scroll(&mut self, now: Instant, out: &mut Vec<EngineOutput>) {
        let State::Scroll { fingers, last_at } = &mut self.state else {
            return;
        };
        if fingers.iter().all(|f| f.current == f.last) {
            return;
        }

        if fingers.len() == 2 {
            let n = fingers.len() as f64;
            let dx = fingers.iter().map(|f| (f.current.x - f.last.x) as f64).sum::<f64>() / n;
            let dy = fingers.iter().map(|f| (f.current.y - f.last.y) as f64).sum::<f64>() / n;
            let dt_ms = now.saturating_duration_since(*last_at).as_secs_f64() * 1000.0;
            let curve = ScrollCurve {
                hires_per_px: self.params.scroll_hires_per_px,
                accel: self.params.scroll_accel,
                max_multiplier: self.params.scroll_max_multiplier,
            };
            if let Some((vertical, horizontal)) =
                self.scroll
                    .feed(dx, dy, dt_ms, &curve, self.params.natural_scroll)
            {
                pointer(
                    out,
                    PointerAction::Scroll {
                        vertical,
                        horizontal,
                    },
                );
            }
        }

        for f in fingers.iter_mut() {
            f.last = f.current;
        }
        *last_at = now;
    }
}

fn pointer(out: &mut Vec<EngineOutput>, action: PointerAction) {
    out.push(EngineOutput::Pointer(action));
}

fn relative(out: &mut Vec<EngineOutput>, from: Point, to: Point) {
    let (dx, dy) = (to.x - from.x, to.y - from.y);
    if dx != 0 || dy != 0 {
        pointer(out, PointerAction::MoveRelative { dx, dy });
    }
}

fn end_drag(kind: DragKind, out: &mut Vec<EngineOutput>) {
    match kind {
        DragKind::Relative => {}
        DragKind::Absolute => pointer(out, PointerAction::TouchUp),
        DragKind::ButtonHeld => pointer(
            out,
            PointerAction::Button {
                button: Button::Left,
                pressed: false,
                at: None,
            },
        ),
    }
}

/// Slot id unique across devices
fn touch_id(key: TouchKey) -> i32 {
    (key.0.index() * MAX_SLOTS + key.1) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Rect;
    use crate::utils::Arena;

    const HEIGHT: i32 = 1280;

    struct Rig {
        engine: GestureEngine,
        regions: RegionTable,
        dev_a: DeviceId,
        dev_b: DeviceId,
        client: ClientId,
        t0: Instant,
    }

    impl Rig {
        fn new() -> Self {
            Self::with_params(GestureConfig::default())
        }

        fn with_params(params: GestureConfig) -> Self {
            let mut devices = Arena::new();
            let dev_a = devices.insert(());
            let dev_b = devices.insert(());
            let mut clients = Arena::new();
            let client = clients.insert(());
            let layout = ScreenLayout {
                width: 720,
                height: HEIGHT,
                count: 2,
            };
            Self {
                engine: GestureEngine::new(params, layout),
                regions: RegionTable::new(),
                dev_a,
                dev_b,
                client,
                t0: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        fn frame(&mut self, device: DeviceId, ms: u64, contacts: &[(usize, ContactPhase, i32, i32)]) -> Vec<EngineOutput> {
            self.send(device, ms, contacts, false)
        }

        /// Final frame the registry produces for a removed device
        fn unplug(&mut self, device: DeviceId, ms: u64, contacts: &[(usize, ContactPhase, i32, i32)]) -> Vec<EngineOutput> {
            self.send(device, ms, contacts, true)
        }

        fn send(
            &mut self,
            device: DeviceId,
            ms: u64,
            contacts: &[(usize, ContactPhase, i32, i32)],
            released: bool,
        ) -> Vec<EngineOutput> {
            let screen_index = if device == self.dev_b { 1 } else { 0 };
            let frame = TouchFrame {
                device,
                screen_index,
                contacts: contacts
                    .iter()
                    .map(|&(slot, phase, x, y)| Contact { slot, phase, x, y })
                    .collect(),
                released,
            };
            let mut out = Vec::new();
            let now = self.at(ms);
            self.engine.process_frame(&frame, &self.regions, now, &mut out);
            out
        }

        fn touch(&mut self, ms: u64, phase: ContactPhase, x: i32, y: i32) -> Vec<EngineOutput> {
            let dev = self.dev_a;
            self.frame(dev, ms, &[(0, phase, x, y)])
        }

        fn tick(&mut self, ms: u64) -> Vec<EngineOutput> {
            let mut out = Vec::new();
            let now = self.at(ms);
            self.engine.tick(now, &mut out);
            out
        }
    }

    use crate::device::ContactPhase::{Down, Move, Up};

    fn button(button: Button, pressed: bool, at: Option<(i32, i32)>) -> EngineOutput {
        EngineOutput::Pointer(PointerAction::Button {
            button,
            pressed,
            at,
        })
    }

    fn is_scroll(o: &EngineOutput) -> bool {
        matches!(o, EngineOutput::Pointer(PointerAction::Scroll { .. }))
    }

    #[test]
    fn test_tap_emits_single_click_at_down_position() {
        let mut rig = Rig::new();
        let mut out = rig.touch(0, Down, 100, 100);
        assert_eq!(rig.engine.phase(), GesturePhase::PendingClassify);
        out.extend(rig.touch(50, Move, 106, 104));
        out.extend(rig.tick(60));
        out.extend(rig.touch(120, Up, 106, 104));
        assert_eq!(
            out,
            vec![
                button(Button::Left, true, Some((100, 100))),
                button(Button::Left, false, Some((100, 100))),
            ]
        );
        assert_eq!(rig.engine.phase(), GesturePhase::Idle);
    }

    #[test]
    fn test_long_press_fires_once() {
        let mut rig = Rig::new();
        let mut out = rig.touch(0, Down, 200, 300);
        out.extend(rig.touch(100, Move, 203, 302));
        out.extend(rig.tick(490));
        assert!(out.is_empty());

        out.extend(rig.tick(500));
        assert_eq!(out, vec![button(Button::Right, true, Some((203, 302)))]);
        assert_eq!(rig.engine.phase(), GesturePhase::LongPressFired);

        // holding longer and wiggling changes nothing
        out.extend(rig.tick(1500));
        out.extend(rig.touch(1600, Move, 260, 340));
        out.extend(rig.touch(3000, Up, 260, 340));
        assert_eq!(
            out,
            vec![
                button(Button::Right, true, Some((203, 302))),
                button(Button::Right, false, None),
            ]
        );
    }

    #[test]
    fn test_release_after_timeout_without_tick_is_long_press() {
        let mut rig = Rig::new();
        let mut out = rig.touch(0, Down, 50, 50);
        out.extend(rig.touch(650, Up, 50, 50));
        assert_eq!(
            out,
            vec![
                button(Button::Right, true, Some((50, 50))),
                button(Button::Right, false, None),
            ]
        );
    }

    #[test]
    fn test_drag_emits_only_relative_motion() {
        let mut rig = Rig::new();
        let mut out = rig.touch(0, Down, 100, 100);
        out.extend(rig.touch(40, Move, 105, 100));
        assert!(out.is_empty());

        out.extend(rig.touch(80, Move, 115, 100));
        assert_eq!(rig.engine.phase(), GesturePhase::Drag);
        out.extend(rig.touch(120, Move, 120, 105));
        out.extend(rig.tick(700));
        out.extend(rig.touch(800, Move, 120, 105));
        out.extend(rig.touch(900, Up, 120, 105));

        assert_eq!(
            out,
            vec![
                EngineOutput::Pointer(PointerAction::MoveRelative { dx: 15, dy: 0 }),
                EngineOutput::Pointer(PointerAction::MoveRelative { dx: 5, dy: 5 }),
            ]
        );
        assert_eq!(rig.engine.phase(), GesturePhase::Idle);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut rig = Rig::new();
        rig.touch(0, Down, 100, 100);
        assert!(rig.touch(10, Move, 110, 100).is_empty());
        assert_eq!(rig.engine.phase(), GesturePhase::PendingClassify);
        assert!(!rig.touch(20, Move, 111, 100).is_empty());
    }

    #[test]
    fn test_absolute_drag_mode() {
        let mut rig = Rig::with_params(GestureConfig {
            drag_mode: DragMode::Absolute,
            ..GestureConfig::default()
        });
        let mut out = rig.touch(0, Down, 100, 100);
        out.extend(rig.touch(50, Move, 100, 130));
        out.extend(rig.touch(60, Move, 100, 140));
        out.extend(rig.touch(70, Up, 100, 140));
        assert_eq!(
            out,
            vec![
                EngineOutput::Pointer(PointerAction::TouchDown { x: 100, y: 100 }),
                EngineOutput::Pointer(PointerAction::MoveAbsolute { x: 100, y: 130 }),
                EngineOutput::Pointer(PointerAction::MoveAbsolute { x: 100, y: 140 }),
                EngineOutput::Pointer(PointerAction::TouchUp),
            ]
        );
    }

    #[test]
    fn test_second_finger_scrolls_without_pointer_output() {
        let mut rig = Rig::new();
        let dev = rig.dev_a;
        let mut out = rig.frame(dev, 0, &[(0, Down, 100, 100)]);
        out.extend(rig.frame(dev, 20, &[(1, Down, 200, 100)]));
        assert_eq!(rig.engine.phase(), GesturePhase::Scroll);

        for i in 1..=5 {
            let y = 100 + 12 * i;
            out.extend(rig.frame(dev, 20 + 10 * i as u64, &[(0, Move, 100, y), (1, Move, 200, y)]));
        }
        // long-press timer no longer applies
        out.extend(rig.tick(900));
        out.extend(rig.frame(dev, 1000, &[(0, Up, 100, 160)]));
        out.extend(rig.frame(dev, 1010, &[(1, Move, 200, 300)]));
        out.extend(rig.frame(dev, 1020, &[(1, Up, 200, 300)]));

        assert!(!out.is_empty());
        assert!(out.iter().all(is_scroll));
        let total: i32 = out
            .iter()
            .map(|o| match o {
                EngineOutput::Pointer(PointerAction::Scroll { vertical, .. }) => vertical.hires,
                _ => 0,
            })
            .sum();
        assert!(total > 0);
        assert_eq!(rig.engine.phase(), GesturePhase::Idle);
    }

    #[test]
    fn test_drag_then_second_finger_scrolls() {
        let mut rig = Rig::new();
        let dev = rig.dev_a;
        rig.frame(dev, 0, &[(0, Down, 100, 100)]);
        let out = rig.frame(dev, 30, &[(0, Move, 100, 130)]);
        assert_eq!(out.len(), 1);

        let mut out = rig.frame(dev, 40, &[(1, Down, 200, 130)]);
        out.extend(rig.frame(dev, 50, &[(0, Move, 100, 160), (1, Move, 200, 160)]));
        out.extend(rig.frame(dev, 60, &[(0, Up, 100, 160), (1, Up, 200, 160)]));
        assert!(!out.is_empty());
        assert!(out.iter().all(is_scroll));
    }

    #[test]
    fn test_third_finger_is_ignored() {
        let mut rig = Rig::new();
        let dev = rig.dev_a;
        rig.frame(dev, 0, &[(0, Down, 100, 100), (1, Down, 200, 100)]);
        assert_eq!(rig.engine.phase(), GesturePhase::Scroll);
        let out = rig.frame(dev, 10, &[(2, Down, 300, 100)]);
        assert!(out.is_empty());
        let out = rig.frame(dev, 20, &[(2, Move, 300, 400)]);
        assert!(out.is_empty());
        rig.frame(dev, 30, &[(0, Up, 100, 100), (1, Up, 200, 100)]);
        assert_eq!(rig.engine.phase(), GesturePhase::Idle);
        assert!(rig.frame(dev, 40, &[(2, Up, 300, 400)]).is_empty());
    }

    #[test]
    fn test_region_touch_is_forwarded_not_classified() {
        let mut rig = Rig::new();
        let client = rig.client;
        rig.regions
            .register(
                1,
                1,
                Rect {
                    x: 10,
                    y: 10,
                    width: 100,
                    height: 50,
                },
                client,
            )
            .unwrap();

        let dev_b = rig.dev_b;
        let out = rig.frame(dev_b, 0, &[(0, Down, 15, 15)]);
        let expected_id = (dev_b.index() * MAX_SLOTS) as i32;
        assert_eq!(
            out,
            vec![EngineOutput::Region {
                owner: client,
                touch: TouchMessage {
                    phase: TouchPhase::Down,
                    region_id: 1,
                    touch_id: expected_id,
                    x: 5,
                    y: 5,
                    abs_x: 15,
                    abs_y: 1295,
                },
            }]
        );
        assert_eq!(rig.engine.phase(), GesturePhase::RegionIntercept);

        // leaving the rectangle and holding past the long-press timeout
        // still belongs to the region
        let mut out = rig.frame(dev_b, 100, &[(0, Move, 400, 400)]);
        out.extend(rig.tick(800));
        out.extend(rig.frame(dev_b, 900, &[(0, Up, 400, 400)]));
        assert_eq!(out.len(), 2);
        assert!(out
            .iter()
            .all(|o| matches!(o, EngineOutput::Region { owner, .. } if *owner == client)));
        assert!(matches!(
            out[1],
            EngineOutput::Region {
                touch: TouchMessage {
                    phase: TouchPhase::Up,
                    x: 390,
                    y: 390,
                    ..
                },
                ..
            }
        ));
        assert_eq!(rig.engine.phase(), GesturePhase::Idle);
    }

    #[test]
    fn test_region_on_other_screen_does_not_match() {
        let mut rig = Rig::new();
        let client = rig.client;
        rig.regions
            .register(
                1,
                1,
                Rect {
                    x: 0,
                    y: 0,
                    width: 100,
                    height: 100,
                },
                client,
            )
            .unwrap();
        let out = rig.touch(0, Down, 50, 50);
        assert!(out.is_empty());
        assert_eq!(rig.engine.phase(), GesturePhase::PendingClassify);
    }

    #[test]
    fn test_disconnected_client_region_no_longer_intercepts() {
        let mut rig = Rig::new();
        let client = rig.client;
        let rect = Rect {
            x: 0,
            y: 0,
            width: 100,
            height: 100,
        };
        rig.regions.register(7, 0, rect, client).unwrap();
        rig.regions.remove_client(client);

        let mut out = rig.touch(0, Down, 50, 50);
        out.extend(rig.touch(30, Up, 50, 50));
        assert_eq!(
            out,
            vec![
                button(Button::Left, true, Some((50, 50))),
                button(Button::Left, false, Some((50, 50))),
            ]
        );
    }

    #[test]
    fn test_region_removed_mid_touch_swallows_rest() {
        let mut rig = Rig::new();
        let client = rig.client;
        let rect = Rect {
            x: 0,
            y: 0,
            width: 100,
            height: 100,
        };
        rig.regions.register(7, 0, rect, client).unwrap();
        assert_eq!(rig.touch(0, Down, 50, 50).len(), 1);

        rig.regions.remove_client(client);
        let mut out = rig.touch(20, Move, 60, 60);
        out.extend(rig.touch(40, Up, 60, 60));
        assert!(out.is_empty());
        assert_eq!(rig.engine.phase(), GesturePhase::Idle);

        // next touch is an ordinary gesture
        rig.touch(100, Down, 50, 50);
        assert_eq!(rig.engine.phase(), GesturePhase::PendingClassify);
    }

    #[test]
    fn test_gesture_alongside_region_touch() {
        let mut rig = Rig::new();
        let client = rig.client;
        let rect = Rect {
            x: 0,
            y: 0,
            width: 100,
            height: 100,
        };
        rig.regions.register(1, 1, rect, client).unwrap();
        let dev_b = rig.dev_b;
        rig.frame(dev_b, 0, &[(0, Down, 10, 10)]);

        // a finger elsewhere is a single-finger gesture, not a scroll
        let mut out = rig.touch(10, Down, 500, 500);
        assert_eq!(rig.engine.phase(), GesturePhase::PendingClassify);
        out.extend(rig.touch(40, Up, 500, 500));
        assert_eq!(
            out,
            vec![
                button(Button::Left, true, Some((500, 500))),
                button(Button::Left, false, Some((500, 500))),
            ]
        );
        assert_eq!(rig.engine.phase(), GesturePhase::RegionIntercept);
    }

    #[test]
    fn test_second_screen_maps_to_logical_y() {
        let mut rig = Rig::new();
        let dev_b = rig.dev_b;
        let mut out = rig.frame(dev_b, 0, &[(0, Down, 30, 50)]);
        out.extend(rig.frame(dev_b, 20, &[(0, Up, 30, 50)]));
        assert_eq!(out[0], button(Button::Left, true, Some((30, 50 + HEIGHT))));
    }

    #[test]
    fn test_tap_drag_holds_left_button() {
        let mut rig = Rig::with_params(GestureConfig {
            tap_drag: true,
            ..GestureConfig::default()
        });
        rig.touch(0, Down, 100, 100);
        rig.touch(50, Up, 100, 100);

        let mut out = rig.touch(200, Down, 102, 101);
        out.extend(rig.touch(220, Move, 110, 101));
        out.extend(rig.touch(260, Up, 110, 101));
        assert_eq!(
            out,
            vec![
                button(Button::Left, true, Some((102, 101))),
                EngineOutput::Pointer(PointerAction::MoveRelative { dx: 8, dy: 0 }),
                button(Button::Left, false, None),
            ]
        );
    }

    #[test]
    fn test_tap_drag_window_expires() {
        let mut rig = Rig::with_params(GestureConfig {
            tap_drag: true,
            ..GestureConfig::default()
        });
        rig.touch(0, Down, 100, 100);
        rig.touch(50, Up, 100, 100);
        rig.touch(600, Down, 100, 100);
        assert_eq!(rig.engine.phase(), GesturePhase::PendingClassify);
    }

    #[test]
    fn test_set_params_changes_threshold() {
        let mut rig = Rig::new();
        rig.engine.set_params(GestureConfig {
            move_threshold_px: 50,
            ..GestureConfig::default()
        });
        rig.touch(0, Down, 100, 100);
        assert!(rig.touch(10, Move, 130, 100).is_empty());
        assert_eq!(rig.engine.phase(), GesturePhase::PendingClassify);
    }

    #[test]
    fn test_device_release_ends_gesture() {
        let mut rig = Rig::new();
        rig.touch(0, Down, 100, 100);
        rig.touch(30, Move, 150, 100);
        assert_eq!(rig.engine.phase(), GesturePhase::Drag);
        let dev = rig.dev_a;
        let out = rig.unplug(dev, 40, &[(0, Up, 150, 100)]);
        assert!(out.is_empty());
        assert_eq!(rig.engine.phase(), GesturePhase::Idle);
    }

    #[test]
    fn test_device_release_while_pending_does_not_click() {
        let mut rig = Rig::new();
        rig.touch(0, Down, 100, 100);
        assert_eq!(rig.engine.phase(), GesturePhase::PendingClassify);
        let dev = rig.dev_a;
        let out = rig.unplug(dev, 50, &[(0, Up, 100, 100)]);
        assert!(out.is_empty());
        assert_eq!(rig.engine.phase(), GesturePhase::Idle);

        // no tap was recorded, so a quick touch afterwards is a plain tap
        rig.engine.set_params(GestureConfig {
            tap_drag: true,
            ..GestureConfig::default()
        });
        rig.touch(100, Down, 100, 100);
        assert_eq!(rig.engine.phase(), GesturePhase::PendingClassify);
    }

    #[test]
    fn test_device_release_still_forwards_region_up() {
        let mut rig = Rig::new();
        let client = rig.client;
        rig.regions
            .register(
                7,
                0,
                Rect {
                    x: 0,
                    y: 0,
                    width: 200,
                    height: 200,
                },
                client,
            )
            .unwrap();
        rig.touch(0, Down, 50, 60);
        let dev = rig.dev_a;
        let out = rig.unplug(dev, 20, &[(0, Up, 50, 60)]);
        assert!(matches!(
            out.as_slice(),
            [EngineOutput::Region {
                touch: TouchMessage {
                    phase: TouchPhase::Up,
                    region_id: 7,
                    ..
                },
                ..
            }]
        ));
        assert_eq!(rig.engine.phase(), GesturePhase::Idle);
    }
}
