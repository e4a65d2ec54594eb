//! Virtual pointer output
//!
//! The gesture engine speaks in [`PointerAction`]s; a [`PointerSink`]
//! turns each one into a complete, synchronized report on a synthetic
//! pointer device.

pub mod uinput;

use anyhow::Result;

pub use uinput::UinputPointer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Left,
    Right,
    Middle,
}

/// One scroll axis, in hi-res units plus derived whole notches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollAmount {
    pub hires: i32,
    pub notches: i32,
}

impl ScrollAmount {
    pub fn is_zero(&self) -> bool {
        self.hires == 0 && self.notches == 0
    }
}

/// A single pointer report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAction {
    MoveRelative { dx: i32, dy: i32 },
    MoveAbsolute { x: i32, y: i32 },
    /// Contact begins at an absolute position (BTN_TOUCH down)
    TouchDown { x: i32, y: i32 },
    TouchUp,
    /// Button transition, optionally positioned in the same report
    Button {
        button: Button,
        pressed: bool,
        at: Option<(i32, i32)>,
    },
    Scroll {
        vertical: ScrollAmount,
        horizontal: ScrollAmount,
    },
}

/// Destination for pointer reports
pub trait PointerSink {
    /// Emit one action as a complete report (events followed by a sync)
    fn emit(&mut self, action: PointerAction) -> Result<()>;
}
