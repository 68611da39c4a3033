//! Wheel rotation accumulators.
//!
//! Every delta feeds two accumulators per axis. The fine one emits a
//! smooth scroll value each time it holds at least one precise step;
//! the coarse one emits one discrete notch for each full step distance
//! it crosses. Both keep their remainder, so splitting a delta into
//! smaller pieces never changes the discrete output.

use crate::compositor::{Axis, AxisEvent};

/// Default distance, in scroll units, of one discrete wheel notch.
pub const DEFAULT_AXIS_STEP_DISTANCE: i32 = 10;

/// RDP rotation units per physical wheel notch.
pub const WHEEL_DELTA: i32 = 120;

/// Fine and coarse accumulation for one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisAccumulator {
    pub precise: i32,
    pub discrete: i32,
    /// Sub-unit remainder of the RDP → step unit scaling.
    rdp_remainder: i32,
}

#[derive(Debug, Clone)]
pub struct WheelAccumulator {
    step: i32,
    precise_step: i32,
    vertical: AxisAccumulator,
    horizontal: AxisAccumulator,
}

impl Default for WheelAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_AXIS_STEP_DISTANCE)
    }
}

impl WheelAccumulator {
    /// `step` is clamped to at least 1.
    pub fn new(step: i32) -> Self {
        let step = step.max(1);
        Self {
            step,
            precise_step: (step / 10).max(1),
            vertical: AxisAccumulator::default(),
            horizontal: AxisAccumulator::default(),
        }
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn state(&self, axis: Axis) -> AxisAccumulator {
        match axis {
            Axis::Vertical => self.vertical,
            Axis::Horizontal => self.horizontal,
        }
    }

    /// Feed `delta` scroll units on `axis`.
    pub fn accumulate(&mut self, axis: Axis, delta: i32) -> Vec<AxisEvent> {
        let (step, precise_step) = (self.step, self.precise_step);
        let acc = self.axis_mut(axis);
        acc.precise += delta;
        acc.discrete += delta;

        let mut events = Vec::new();
        if acc.precise.abs() >= precise_step {
            let whole = acc.precise - acc.precise % precise_step;
            events.push(AxisEvent::Smooth {
                axis,
                value: whole as f64,
            });
            acc.precise -= whole;
        }
        while acc.discrete.abs() >= step {
            let sign = acc.discrete.signum();
            events.push(AxisEvent::Discrete { axis, steps: sign });
            acc.discrete -= sign * step;
        }
        events
    }

    /// Feed a raw RDP rotation (120 per notch, positive away from the
    /// user). Vertical direction is flipped to compositor convention.
    pub fn accumulate_rdp(&mut self, axis: Axis, raw: i32) -> Vec<AxisEvent> {
        let step = self.step;
        let acc = self.axis_mut(axis);
        acc.rdp_remainder += raw * step;
        let mut units = acc.rdp_remainder / WHEEL_DELTA;
        acc.rdp_remainder %= WHEEL_DELTA;
        if axis == Axis::Vertical {
            units = -units;
        }
        if units == 0 {
            return Vec::new();
        }
        self.accumulate(axis, units)
    }

    fn axis_mut(&mut self, axis: Axis) -> &mut AxisAccumulator {
        match axis {
            Axis::Vertical => &mut self.vertical,
            Axis::Horizontal => &mut self.horizontal,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
