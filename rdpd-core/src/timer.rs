//! Frame-completion timer pacing repaints to the refresh rate.

use std::time::{Duration, Instant};

/// Clamp range for the refresh rate, in Hz.
pub const MIN_REFRESH_RATE: u32 = 1;
pub const MAX_REFRESH_RATE: u32 = 240;
pub const DEFAULT_REFRESH_RATE: u32 = 60;

/// One-shot timer armed after each repaint.
///
/// While armed, no new repaint starts; damage accumulates until
/// [`fire`](Self::fire) reports the frame as finished.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    interval: Duration,
    deadline: Option<Instant>,
}

impl FrameTimer {
    pub fn new(refresh_rate: u32) -> Self {
        Self {
            interval: Self::interval_for(refresh_rate),
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Arm for one frame interval from `now`. Re-arming moves the
    /// deadline.
    pub fn arm(&mut self, now: Instant) -> Instant {
        let deadline = now + self.interval;
        self.deadline = Some(deadline);
        deadline
    }

    /// Disarm and return `true` if the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    fn interval_for(refresh_rate: u32) -> Duration {
        Duration::from_secs(1) / refresh_rate.clamp(MIN_REFRESH_RATE, MAX_REFRESH_RATE)
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_RATE)
    }
}
