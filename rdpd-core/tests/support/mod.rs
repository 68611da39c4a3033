//! In-memory protocol, reactor and compositor used by the integration
//! tests. Every mock keeps its observable state behind an `Rc` so the
//! test can inspect it after ownership moved into the backend.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{OwnedFd, RawFd};
use std::rc::Rc;
use std::task::{Context, Poll};

use rdpd_core::{
    AxisEvent, BackendConfig, ClientCapabilities, Compositor, EncodedUpdate, NegotiatedSettings,
    PeerConnection, PeerEvent, PressState, Protocol, ProtocolListener, RdpError, Reactor, Rect,
    SeatId, SecurityConfig, ShadowFramebuffer, SyncFlags, TranslatedKey, Watch, XkbRuleNames,
};
use rdpd_core::backend::ListenSource;
use rdpd_core::codec::CodecVariant;

pub const LISTENER_FD: RawFd = 1000;

// ── Connection ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub frame_id: u32,
    pub codec: CodecVariant,
    pub full_frame: bool,
    pub rects: usize,
}

#[derive(Debug, Default)]
pub struct ConnState {
    pub pending: VecDeque<PeerEvent>,
    pub fail_pending: bool,
    pub fail_sends: bool,
    pub fail_resizes: bool,
    /// Output the socket has not taken yet; cleared by `check_pending`.
    pub unsent: bool,
    /// Input left unread by the last `check_pending`.
    pub unread: bool,
    pub pending_calls: usize,
    pub settings: Option<NegotiatedSettings>,
    pub resizes: Vec<(u32, u32)>,
    pub frames: Vec<SentFrame>,
    pub closed: bool,
    pub close_calls: usize,
}

/// Test-side handle onto a [`MockConnection`].
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub fd: RawFd,
    pub state: Rc<RefCell<ConnState>>,
}

impl ConnHandle {
    pub fn push(&self, event: PeerEvent) {
        self.state.borrow_mut().pending.push_back(event);
    }

    pub fn frames(&self) -> Vec<SentFrame> {
        self.state.borrow().frames.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn fail_sends(&self) {
        self.state.borrow_mut().fail_sends = true;
    }

    pub fn fail_resizes(&self) {
        self.state.borrow_mut().fail_resizes = true;
    }

    pub fn resizes(&self) -> Vec<(u32, u32)> {
        self.state.borrow().resizes.clone()
    }

    pub fn settings(&self) -> Option<NegotiatedSettings> {
        self.state.borrow().settings
    }
}

#[derive(Debug)]
pub struct MockConnection {
    fd: RawFd,
    name: String,
    state: Rc<RefCell<ConnState>>,
    _owned: Option<OwnedFd>,
}

impl MockConnection {
    pub fn new(fd: RawFd) -> (Self, ConnHandle) {
        let state = Rc::new(RefCell::new(ConnState::default()));
        let conn = Self {
            fd,
            name: format!("mock-{fd}"),
            state: Rc::clone(&state),
            _owned: None,
        };
        (conn, ConnHandle { fd, state })
    }
}

impl PeerConnection for MockConnection {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn peer_name(&self) -> String {
        self.name.clone()
    }

    fn check_pending(&mut self) -> Result<Vec<PeerEvent>, RdpError> {
        let mut state = self.state.borrow_mut();
        state.pending_calls += 1;
        if state.fail_pending {
            return Err(RdpError::Protocol("garbled pdu".into()));
        }
        state.unsent = false;
        Ok(state.pending.drain(..).collect())
    }

    fn wants_write(&self) -> bool {
        self.state.borrow().unsent
    }

    fn has_buffered_input(&self) -> bool {
        self.state.borrow().unread
    }

    fn accept_settings(&mut self, settings: &NegotiatedSettings) -> Result<(), RdpError> {
        self.state.borrow_mut().settings = Some(*settings);
        Ok(())
    }

    fn resize_desktop(&mut self, width: u32, height: u32) -> Result<(), RdpError> {
        let mut state = self.state.borrow_mut();
        if state.fail_resizes {
            return Err(RdpError::Protocol("resize refused".into()));
        }
        state.resizes.push((width, height));
        Ok(())
    }

    fn send_update(&mut self, update: &EncodedUpdate<'_>) -> Result<(), RdpError> {
        let mut state = self.state.borrow_mut();
        if state.fail_sends {
            return Err(RdpError::Protocol("connection reset mid-update".into()));
        }
        state.frames.push(SentFrame {
            frame_id: update.frame_id,
            codec: update.codec,
            full_frame: update.full_frame,
            rects: update.rects.len(),
        });
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.closed = true;
        state.close_calls += 1;
    }
}

// ── Listener & protocol ──────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ListenerState {
    pub queue: VecDeque<MockConnection>,
    pub fail_next: bool,
    pub accepted: usize,
}

pub struct MockListener {
    state: Rc<RefCell<ListenerState>>,
}

impl ProtocolListener for MockListener {
    type Connection = MockConnection;

    fn fd(&self) -> RawFd {
        LISTENER_FD
    }

    fn accept(&mut self) -> Result<Option<MockConnection>, RdpError> {
        let mut state = self.state.borrow_mut();
        if std::mem::take(&mut state.fail_next) {
            return Err(RdpError::Io(io::Error::new(io::ErrorKind::Other, "EMFILE")));
        }
        let next = state.queue.pop_front();
        if next.is_some() {
            state.accepted += 1;
        }
        Ok(next)
    }
}

#[derive(Clone, Default)]
pub struct MockProtocol {
    pub listener: Rc<RefCell<ListenerState>>,
    pub adopted: Rc<RefCell<Option<ConnHandle>>>,
    next_fd: Rc<RefCell<RawFd>>,
}

impl MockProtocol {
    /// Queue a client connection on the listener.
    pub fn connect(&self) -> ConnHandle {
        let fd = {
            let mut next = self.next_fd.borrow_mut();
            *next += 1;
            LISTENER_FD + *next
        };
        let (conn, handle) = MockConnection::new(fd);
        self.listener.borrow_mut().queue.push_back(conn);
        handle
    }
}

impl Protocol for MockProtocol {
    type Connection = MockConnection;
    type Listener = MockListener;

    fn listen(&self, _addr: SocketAddr) -> Result<MockListener, RdpError> {
        Ok(MockListener {
            state: Rc::clone(&self.listener),
        })
    }

    fn adopt(&self, fd: OwnedFd) -> Result<MockConnection, RdpError> {
        use std::os::fd::AsRawFd;
        let (mut conn, handle) = MockConnection::new(fd.as_raw_fd());
        conn._owned = Some(fd);
        *self.adopted.borrow_mut() = Some(handle);
        Ok(conn)
    }
}

// ── Reactor ──────────────────────────────────────────────────────

/// Records which descriptors are currently watched.
#[derive(Clone, Default)]
pub struct MockReactor {
    pub watched: Rc<RefCell<HashSet<RawFd>>>,
    pub registrations: Rc<RefCell<usize>>,
}

struct MockWatch {
    fd: RawFd,
    watched: Rc<RefCell<HashSet<RawFd>>>,
}

impl Reactor for MockReactor {
    fn watch(&mut self, fd: RawFd) -> io::Result<Box<dyn Watch>> {
        if !self.watched.borrow_mut().insert(fd) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "double registration"));
        }
        *self.registrations.borrow_mut() += 1;
        Ok(Box::new(MockWatch {
            fd,
            watched: Rc::clone(&self.watched),
        }))
    }
}

/// Never readable on its own; always writable.
impl Watch for MockWatch {
    fn poll_readable(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }

    fn poll_writable(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Drop for MockWatch {
    fn drop(&mut self) {
        self.watched.borrow_mut().remove(&self.fd);
    }
}

// ── Compositor ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Injected {
    Key(SeatId, TranslatedKey, PressState),
    Motion(SeatId, u32, u32),
    Button(SeatId, u32, PressState),
    Axis(SeatId, AxisEvent),
    Frame(SeatId),
    Locks(SeatId, SyncFlags),
}

#[derive(Debug)]
pub struct CompositorState {
    pub next_seat: u32,
    pub seats: Vec<(SeatId, String, XkbRuleNames)>,
    pub detached: Vec<SeatId>,
    pub accept_modes: bool,
    pub modes: Vec<(u32, u32)>,
    pub repaints: u32,
    pub finished_frames: u32,
    pub injected: Vec<Injected>,
}

impl Default for CompositorState {
    fn default() -> Self {
        Self {
            next_seat: 0,
            seats: Vec::new(),
            detached: Vec::new(),
            accept_modes: true,
            modes: Vec::new(),
            repaints: 0,
            finished_frames: 0,
            injected: Vec::new(),
        }
    }
}

/// Paints each damaged rect with a colour derived from the repaint
/// count, so every repaint produces visible change.
#[derive(Debug, Clone, Default)]
pub struct MockCompositor {
    pub state: Rc<RefCell<CompositorState>>,
}

impl MockCompositor {
    pub fn injected(&self) -> Vec<Injected> {
        self.state.borrow().injected.clone()
    }

    pub fn live_seats(&self) -> usize {
        let state = self.state.borrow();
        state.seats.len() - state.detached.len()
    }
}

impl Compositor for MockCompositor {
    fn attach_seat(&mut self, name: &str, keymap: &XkbRuleNames) -> Result<SeatId, RdpError> {
        let mut state = self.state.borrow_mut();
        state.next_seat += 1;
        let seat = SeatId(state.next_seat);
        state.seats.push((seat, name.to_string(), keymap.clone()));
        Ok(seat)
    }

    fn detach_seat(&mut self, seat: SeatId) {
        self.state.borrow_mut().detached.push(seat);
    }

    fn set_output_mode(&mut self, width: u32, height: u32) -> bool {
        let mut state = self.state.borrow_mut();
        if state.accept_modes {
            state.modes.push((width, height));
        }
        state.accept_modes
    }

    fn repaint(&mut self, framebuffer: &mut ShadowFramebuffer, damage: &[Rect]) {
        let mut state = self.state.borrow_mut();
        state.repaints += 1;
        let shade = (state.repaints % 250) as u8 + 1;
        for rect in damage {
            framebuffer.fill(*rect, [shade, shade, shade, 0xFF]);
        }
    }

    fn finish_frame(&mut self) {
        self.state.borrow_mut().finished_frames += 1;
    }

    fn notify_key(&mut self, seat: SeatId, key: TranslatedKey, state: PressState) {
        self.state.borrow_mut().injected.push(Injected::Key(seat, key, state));
    }

    fn notify_motion_absolute(&mut self, seat: SeatId, x: u32, y: u32) {
        self.state.borrow_mut().injected.push(Injected::Motion(seat, x, y));
    }

    fn notify_button(&mut self, seat: SeatId, button: u32, state: PressState) {
        self.state.borrow_mut().injected.push(Injected::Button(seat, button, state));
    }

    fn notify_axis(&mut self, seat: SeatId, event: AxisEvent) {
        self.state.borrow_mut().injected.push(Injected::Axis(seat, event));
    }

    fn notify_pointer_frame(&mut self, seat: SeatId) {
        self.state.borrow_mut().injected.push(Injected::Frame(seat));
    }

    fn set_keyboard_locks(&mut self, seat: SeatId, locks: SyncFlags) {
        self.state.borrow_mut().injected.push(Injected::Locks(seat, locks));
    }
}

// ── Helpers ──────────────────────────────────────────────────────

pub fn config() -> BackendConfig {
    BackendConfig {
        listen: ListenSource::Bind("127.0.0.1:3389".parse().expect("addr")),
        security: SecurityConfig {
            rdp_key: Some("rdp.key".into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn caps() -> ClientCapabilities {
    ClientCapabilities::default()
}
