//! Headless compositor.
//!
//! Stands in for a real display server: renders a scrolling colour-bar
//! test pattern into the shadow framebuffer, keeps per-seat input state
//! and logs injected events. [`DamageGenerator`] animates the pattern by
//! reporting a moving band of damage once per refresh interval.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rdpd_core::{
    AxisEvent, Compositor, DamageSender, PressState, RdpError, Rect, SeatId, ShadowFramebuffer,
    SyncFlags, TranslatedKey, XkbRuleNames,
};

/// Height of the band repainted per generated frame.
const BAND: u32 = 32;

const BARS: [[u8; 4]; 8] = [
    [0xC0, 0xC0, 0xC0, 0xFF],
    [0x00, 0xC0, 0xC0, 0xFF],
    [0xC0, 0xC0, 0x00, 0xFF],
    [0x00, 0xC0, 0x00, 0xFF],
    [0xC0, 0x00, 0xC0, 0xFF],
    [0x00, 0x00, 0xC0, 0xFF],
    [0xC0, 0x00, 0x00, 0xFF],
    [0x10, 0x10, 0x10, 0xFF],
];

// ── Shared mode ──────────────────────────────────────────────────

/// Current output mode, readable from other tasks.
#[derive(Debug, Clone)]
pub struct SharedMode(Arc<AtomicU64>);

impl SharedMode {
    pub fn new(width: u32, height: u32) -> Self {
        Self(Arc::new(AtomicU64::new(pack(width, height))))
    }

    pub fn get(&self) -> (u32, u32) {
        let v = self.0.load(Ordering::Acquire);
        ((v >> 32) as u32, v as u32)
    }

    pub fn set(&self, width: u32, height: u32) {
        self.0.store(pack(width, height), Ordering::Release);
    }
}

fn pack(width: u32, height: u32) -> u64 {
    (u64::from(width) << 32) | u64::from(height)
}

// ── Seats ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Seat {
    pub name: String,
    pub keymap: XkbRuleNames,
    pub pointer: (u32, u32),
    pub keys: HashSet<u32>,
    pub buttons: HashSet<u32>,
    pub locks: SyncFlags,
}

// ── HeadlessCompositor ───────────────────────────────────────────

#[derive(Debug)]
pub struct HeadlessCompositor {
    mode: SharedMode,
    seats: HashMap<SeatId, Seat>,
    next_seat: u32,
    frames: u64,
    /// Largest mode the compositor will accept.
    max_mode: (u32, u32),
}

impl HeadlessCompositor {
    pub fn new(mode: SharedMode) -> Self {
        Self {
            mode,
            seats: HashMap::new(),
            next_seat: 0,
            frames: 0,
            max_mode: (8192, 8192),
        }
    }

    pub fn with_max_mode(mut self, width: u32, height: u32) -> Self {
        self.max_mode = (width, height);
        self
    }

    pub fn mode(&self) -> (u32, u32) {
        self.mode.get()
    }

    pub fn seat(&self, id: SeatId) -> Option<&Seat> {
        self.seats.get(&id)
    }

    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }

    /// Frames finished so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn seat_mut(&mut self, id: SeatId) -> Option<&mut Seat> {
        let seat = self.seats.get_mut(&id);
        if seat.is_none() {
            tracing::warn!(%id, "event for unknown seat");
        }
        seat
    }
}

/// Colour bars scrolled horizontally by `offset` pixels.
fn render_pattern(fb: &mut ShadowFramebuffer, rect: Rect, offset: u32) {
    let Some(rect) = rect.intersect(&fb.bounds()) else {
        return;
    };
    let (width, stride) = (fb.width(), fb.stride() as usize);
    let bar_width = (width / BARS.len() as u32).max(1);
    let data = fb.data_mut();
    for y in rect.y..rect.bottom() {
        let row = y as usize * stride;
        for x in rect.x..rect.right() {
            let bar = (((x + offset) % width) / bar_width) as usize % BARS.len();
            let at = row + x as usize * 4;
            data[at..at + 4].copy_from_slice(&BARS[bar]);
        }
    }
}

impl Compositor for HeadlessCompositor {
    fn attach_seat(&mut self, name: &str, keymap: &XkbRuleNames) -> Result<SeatId, RdpError> {
        self.next_seat += 1;
        let id = SeatId(self.next_seat);
        tracing::info!(%id, name, layout = ?keymap.layout, variant = ?keymap.variant, "seat attached");
        self.seats.insert(
            id,
            Seat {
                name: name.to_string(),
                keymap: keymap.clone(),
                pointer: (0, 0),
                keys: HashSet::new(),
                buttons: HashSet::new(),
                locks: SyncFlags::empty(),
            },
        );
        Ok(id)
    }

    fn detach_seat(&mut self, seat: SeatId) {
        if let Some(removed) = self.seats.remove(&seat) {
            tracing::info!(%seat, name = %removed.name, "seat detached");
        }
    }

    fn set_output_mode(&mut self, width: u32, height: u32) -> bool {
        if width > self.max_mode.0 || height > self.max_mode.1 {
            tracing::warn!("refusing mode {width}x{height}");
            return false;
        }
        self.mode.set(width, height);
        true
    }

    fn repaint(&mut self, framebuffer: &mut ShadowFramebuffer, damage: &[Rect]) {
        let offset = (self.frames * 4) as u32;
        for rect in damage {
            render_pattern(framebuffer, *rect, offset);
        }
    }

    fn finish_frame(&mut self) {
        self.frames += 1;
    }

    fn notify_key(&mut self, seat: SeatId, key: TranslatedKey, state: PressState) {
        tracing::trace!(target: "rdp::verbose", %seat, keycode = key.keycode, keysym = ?key.keysym, ?state, "key");
        if let Some(seat) = self.seat_mut(seat) {
            match state {
                PressState::Pressed => seat.keys.insert(key.keycode),
                PressState::Released => seat.keys.remove(&key.keycode),
            };
        }
    }

    fn notify_motion_absolute(&mut self, seat: SeatId, x: u32, y: u32) {
        if let Some(seat) = self.seat_mut(seat) {
            seat.pointer = (x, y);
        }
    }

    fn notify_button(&mut self, seat: SeatId, button: u32, state: PressState) {
        tracing::trace!(target: "rdp::verbose", %seat, button, ?state, "button");
        if let Some(seat) = self.seat_mut(seat) {
            match state {
                PressState::Pressed => seat.buttons.insert(button),
                PressState::Released => seat.buttons.remove(&button),
            };
        }
    }

    fn notify_axis(&mut self, seat: SeatId, event: AxisEvent) {
        tracing::trace!(target: "rdp::verbose", %seat, ?event, "axis");
    }

    fn notify_pointer_frame(&mut self, _seat: SeatId) {}

    fn set_keyboard_locks(&mut self, seat: SeatId, locks: SyncFlags) {
        if let Some(seat) = self.seat_mut(seat) {
            seat.locks = locks;
        }
    }
}

// ── Damage generator ─────────────────────────────────────────────

/// Reports a band of damage sweeping down the screen.
#[derive(Debug)]
pub struct DamageGenerator {
    mode: SharedMode,
    interval: Duration,
    row: u32,
}

impl DamageGenerator {
    pub fn new(mode: SharedMode, refresh_rate: u32) -> Self {
        Self {
            mode,
            interval: Duration::from_secs(1) / refresh_rate.max(1),
            row: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Damage for the next frame.
    pub fn next_damage(&mut self) -> Vec<Rect> {
        let (width, height) = self.mode.get();
        if width == 0 || height == 0 {
            return Vec::new();
        }
        if self.row >= height {
            self.row = 0;
        }
        let band = Rect::new(0, self.row, width, BAND.min(height - self.row));
        self.row += BAND;
        vec![band]
    }

    /// Send damage every interval until the receiver goes away.
    pub async fn run(mut self, tx: DamageSender) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if tx.send(self.next_damage()).is_err() {
                break;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rdpd_core::PixelFormat;

    fn keymap() -> XkbRuleNames {
        XkbRuleNames {
            rules: "evdev",
            model: "pc105",
            layout: Some("us"),
            variant: None,
            options: None,
        }
    }

    #[test]
    fn shared_mode_roundtrip() {
        let mode = SharedMode::new(1920, 1080);
        let other = mode.clone();
        other.set(800, 600);
        assert_eq!(mode.get(), (800, 600));
    }

    #[test]
    fn seats_track_input() {
        let mut comp = HeadlessCompositor::new(SharedMode::new(640, 480));
        let seat = comp.attach_seat("rdp-desk", &keymap()).unwrap();
        let key = TranslatedKey {
            keycode: 30,
            keysym: None,
        };
        comp.notify_key(seat, key, PressState::Pressed);
        comp.notify_button(seat, 0x110, PressState::Pressed);
        comp.notify_motion_absolute(seat, 10, 20);
        comp.set_keyboard_locks(seat, SyncFlags::NUM_LOCK);

        let state = comp.seat(seat).unwrap();
        assert!(state.keys.contains(&30));
        assert!(state.buttons.contains(&0x110));
        assert_eq!(state.pointer, (10, 20));
        assert_eq!(state.locks, SyncFlags::NUM_LOCK);

        comp.notify_key(seat, key, PressState::Released);
        assert!(comp.seat(seat).unwrap().keys.is_empty());

        comp.detach_seat(seat);
        assert_eq!(comp.seat_count(), 0);
    }

    #[test]
    fn oversized_mode_rejected() {
        let mode = SharedMode::new(640, 480);
        let mut comp = HeadlessCompositor::new(mode.clone()).with_max_mode(1024, 768);
        assert!(!comp.set_output_mode(2048, 768));
        assert_eq!(mode.get(), (640, 480));
        assert!(comp.set_output_mode(1024, 768));
        assert_eq!(mode.get(), (1024, 768));
    }

    #[test]
    fn pattern_scrolls_between_frames() {
        let mut comp = HeadlessCompositor::new(SharedMode::new(64, 8));
        let mut fb = ShadowFramebuffer::new(64, 8, PixelFormat::default());
        let all = fb.bounds();

        comp.repaint(&mut fb, &[all]);
        let first = fb.data().to_vec();
        assert_eq!(&first[..4], &BARS[0]);

        comp.finish_frame();
        comp.repaint(&mut fb, &[all]);
        assert_ne!(fb.data(), &first[..]);
    }

    #[test]
    fn repaint_only_touches_damage() {
        let mut comp = HeadlessCompositor::new(SharedMode::new(32, 32));
        let mut fb = ShadowFramebuffer::new(32, 32, PixelFormat::default());
        comp.repaint(&mut fb, &[Rect::new(0, 0, 4, 4)]);
        let stride = fb.stride() as usize;
        assert_eq!(&fb.data()[..4], &BARS[0]);
        assert_eq!(&fb.data()[stride * 10..stride * 10 + 4], &[0, 0, 0, 0]);
    }

    #[test]
    fn generator_sweeps_and_wraps() {
        let mode = SharedMode::new(100, 70);
        let mut generator = DamageGenerator::new(mode.clone(), 60);
        assert_eq!(generator.next_damage(), vec![Rect::new(0, 0, 100, 32)]);
        assert_eq!(generator.next_damage(), vec![Rect::new(0, 32, 100, 32)]);
        assert_eq!(generator.next_damage(), vec![Rect::new(0, 64, 100, 6)]);
        assert_eq!(generator.next_damage(), vec![Rect::new(0, 0, 100, 32)]);

        mode.set(50, 10);
        assert_eq!(generator.next_damage(), vec![Rect::new(0, 0, 50, 10)]);
    }

    #[tokio::test]
    async fn generator_stops_when_receiver_drops() {
        let (tx, mut rx) = rdpd_core::damage_channel();
        let generator = DamageGenerator::new(SharedMode::new(64, 64), 240);
        let task = tokio::spawn(generator.run(tx));
        assert!(rx.recv().await.is_some());
        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
