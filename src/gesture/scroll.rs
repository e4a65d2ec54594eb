//! Two-finger scroll conversion
//!
//! Finger travel becomes hi-res wheel units through a speed-dependent
//! multiplier. Fractions of a hi-res unit and hi-res units short of a
//! full notch are carried between frames so slow scrolling is not lost.

use crate::constants::HIRES_PER_NOTCH;
use crate::pointer::ScrollAmount;

/// Speed-to-multiplier curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollCurve {
    pub hires_per_px: f64,
    pub accel: f64,
    pub max_multiplier: f64,
}

impl ScrollCurve {
    /// `1 + accel × speed`, capped; speed in px/ms
    pub fn multiplier(&self, distance_px: f64, dt_ms: f64) -> f64 {
        let speed = distance_px / dt_ms.max(1.0);
        (1.0 + self.accel * speed).min(self.max_multiplier.max(1.0))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Axis {
    /// Fraction of a hi-res unit not yet emitted
    remainder: f64,
    /// Hi-res units not yet converted into a notch
    notch_acc: i32,
}

impl Axis {
    fn feed(&mut self, hires_exact: f64) -> ScrollAmount {
        let total = hires_exact + self.remainder;
        let hires = total.trunc() as i32;
        self.remainder = total - hires as f64;
        self.notch_acc += hires;
        let notches = self.notch_acc / HIRES_PER_NOTCH;
        self.notch_acc -= notches * HIRES_PER_NOTCH;
        ScrollAmount { hires, notches }
    }
}

/// Per-gesture scroll state
#[derive(Debug, Clone, Default)]
pub struct ScrollAccumulator {
    vertical: Axis,
    horizontal: Axis,
}

impl ScrollAccumulator {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Convert one averaged finger delta into wheel amounts.
    ///
    /// With natural scrolling the content follows the fingers: moving down
    /// scrolls toward the top (wheel up), moving right scrolls left.
    /// Returns None when nothing reaches a whole hi-res unit yet.
    pub fn feed(
        &mut self,
        dx: f64,
        dy: f64,
        dt_ms: f64,
        curve: &ScrollCurve,
        natural: bool,
    ) -> Option<(ScrollAmount, ScrollAmount)> {
        let distance = (dx * dx + dy * dy).sqrt();
        let scale = curve.hires_per_px * curve.multiplier(distance, dt_ms);
        let sign = if natural { 1.0 } else { -1.0 };
        let vertical = self.vertical.feed(sign * dy * scale);
        let horizontal = self.horizontal.feed(-sign * dx * scale);
        if vertical.is_zero() && horizontal.is_zero() {
            None
        } else {
            Some((vertical, horizontal))
        }
    }
}
