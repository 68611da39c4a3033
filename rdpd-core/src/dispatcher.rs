//! Descriptor watches and per-connection dispatch.
//!
//! The [`WatchTable`] holds exactly one readiness registration per live
//! descriptor: the listen socket plus one per peer. Registrations are
//! RAII handles, so removing an entry is what stops the watch.
//!
//! The [`Dispatcher`] reacts to readiness:
//!
//! | Descriptor | Action                                               |
//! |------------|------------------------------------------------------|
//! | listener   | accept every queued connection, create peer records  |
//! | peer       | process pending data, apply events, tear down on error |
//!
//! Peers also report ready without fresh readiness while their
//! connection holds unsent output and the socket is writable, or
//! still has input it did not read in its last dispatch.
//!
//! Teardown is synchronous: when [`Dispatcher::dispatch`] returns, a
//! closed peer is gone from the output and its descriptor is no longer
//! watched.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::codec::CompressionPolicy;
use crate::compositor::Compositor;
use crate::error::RdpError;
use crate::output::Output;
use crate::peer::{NegotiationPolicy, PeerId, PeerRecord};
use crate::protocol::{PeerConnection, PeerEvent, Protocol, ProtocolListener};
use crate::types::Rect;

/// Default cap on simultaneously watched peer descriptors.
pub const DEFAULT_MAX_PEERS: usize = 32;

// ── Reactor seam ─────────────────────────────────────────────────

/// A readiness registration. Dropping it deregisters the descriptor.
pub trait Watch {
    /// Resolve once the descriptor is readable, consuming the
    /// readiness so the next poll waits for new data.
    fn poll_readable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// Resolve once the descriptor accepts writes, consuming the
    /// readiness.
    fn poll_writable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

/// Source of [`Watch`] registrations.
pub trait Reactor {
    fn watch(&mut self, fd: RawFd) -> io::Result<Box<dyn Watch>>;
}

// ── WatchTable ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Listener,
    Peer(PeerId),
}

struct WatchEntry {
    kind: WatchKind,
    handle: Box<dyn Watch>,
}

/// Descriptor-keyed watch set with a bounded number of peer entries.
pub struct WatchTable {
    entries: HashMap<RawFd, WatchEntry>,
    peer_capacity: usize,
}

impl WatchTable {
    pub fn new(peer_capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            peer_capacity,
        }
    }

    pub fn peer_capacity(&self) -> usize {
        self.peer_capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peer_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.kind, WatchKind::Peer(_)))
            .count()
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.entries.contains_key(&fd)
    }

    pub fn kind(&self, fd: RawFd) -> Option<WatchKind> {
        self.entries.get(&fd).map(|e| e.kind)
    }

    /// Fails with `ResourceExhausted` when no peer slot is free.
    pub fn ensure_peer_slot(&self) -> Result<(), RdpError> {
        if self.peer_count() >= self.peer_capacity {
            return Err(RdpError::ResourceExhausted {
                capacity: self.peer_capacity,
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, fd: RawFd, kind: WatchKind, handle: Box<dyn Watch>) -> Result<(), RdpError> {
        if matches!(kind, WatchKind::Peer(_)) {
            self.ensure_peer_slot()?;
        }
        if self.entries.contains_key(&fd) {
            return Err(RdpError::Protocol(format!("descriptor {fd} already watched")));
        }
        self.entries.insert(fd, WatchEntry { kind, handle });
        Ok(())
    }

    /// Remove and drop the registration for `fd`.
    pub fn remove(&mut self, fd: RawFd) -> Option<WatchKind> {
        self.entries.remove(&fd).map(|e| e.kind)
    }

    /// Collect every readable descriptor, plus those in `writers` that
    /// are writable, or `Pending` if there are none.
    pub fn poll_ready(&mut self, cx: &mut Context<'_>, writers: &[RawFd]) -> Poll<Vec<RawFd>> {
        let mut ready = Vec::new();
        for (fd, entry) in self.entries.iter_mut() {
            let mut result = entry.handle.poll_readable(cx);
            if result.is_pending() && writers.contains(fd) {
                result = entry.handle.poll_writable(cx);
            }
            match result {
                Poll::Ready(Ok(())) => ready.push(*fd),
                Poll::Ready(Err(e)) => {
                    // Let the owner observe the failure on its next read.
                    tracing::debug!(target: "rdp", fd = *fd, "watch error: {e}");
                    ready.push(*fd);
                }
                Poll::Pending => {}
            }
        }
        if ready.is_empty() {
            Poll::Pending
        } else {
            // Listener first, then peers in descriptor order.
            ready.sort_by_key(|fd| (self.kind(*fd) != Some(WatchKind::Listener), *fd));
            Poll::Ready(ready)
        }
    }
}

impl std::fmt::Debug for WatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: HashMap<_, _> = self.entries.iter().map(|(fd, e)| (*fd, e.kind)).collect();
        f.debug_struct("WatchTable")
            .field("entries", &kinds)
            .field("peer_capacity", &self.peer_capacity)
            .finish()
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

/// Per-peer settings applied to every new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSettings {
    pub negotiation: NegotiationPolicy,
    pub compression: CompressionPolicy,
    pub axis_step_distance: i32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            negotiation: NegotiationPolicy::default(),
            compression: CompressionPolicy::default(),
            axis_step_distance: crate::input::DEFAULT_AXIS_STEP_DISTANCE,
        }
    }
}

pub struct Dispatcher<P: Protocol> {
    listener: Option<P::Listener>,
    output: Output<P::Connection>,
    watches: WatchTable,
    reactor: Box<dyn Reactor>,
    settings: PeerSettings,
    next_peer: u64,
}

impl<P: Protocol> Dispatcher<P> {
    pub fn new(output: Output<P::Connection>, reactor: Box<dyn Reactor>, max_peers: usize, settings: PeerSettings) -> Self {
        Self {
            listener: None,
            output,
            watches: WatchTable::new(max_peers),
            reactor,
            settings,
            next_peer: 1,
        }
    }

    pub fn output(&self) -> &Output<P::Connection> {
        &self.output
    }

    pub fn watches(&self) -> &WatchTable {
        &self.watches
    }

    pub fn listener(&self) -> Option<&P::Listener> {
        self.listener.as_ref()
    }

    pub fn settings(&self) -> &PeerSettings {
        &self.settings
    }

    // ── Registration ─────────────────────────────────────────────

    /// Install the listen socket and watch it.
    pub fn set_listener(&mut self, listener: P::Listener) -> Result<(), RdpError> {
        let fd = listener.fd();
        let handle = self
            .reactor
            .watch(fd)
            .map_err(|e| RdpError::ListenerFatal(format!("cannot watch listener: {e}")))?;
        self.watches.insert(fd, WatchKind::Listener, handle)?;
        self.listener = Some(listener);
        tracing::debug!(target: "rdp", fd, "listener watched");
        Ok(())
    }

    /// Create a peer record for `connection`.
    ///
    /// On failure the connection is closed and nothing is retained.
    pub fn add_connection(&mut self, mut connection: P::Connection) -> Result<PeerId, RdpError> {
        let fd = connection.fd();
        let registered = self
            .watches
            .ensure_peer_slot()
            .and_then(|()| self.reactor.watch(fd).map_err(RdpError::from));
        let handle = match registered {
            Ok(handle) => handle,
            Err(e) => {
                connection.close();
                return Err(e);
            }
        };

        let id = PeerId(self.next_peer);
        self.next_peer += 1;
        if let Err(e) = self.watches.insert(fd, WatchKind::Peer(id), handle) {
            connection.close();
            return Err(e);
        }

        let record = PeerRecord::new(
            id,
            connection,
            self.settings.compression,
            self.settings.axis_step_distance,
        );
        tracing::info!(peer = %id, name = record.name(), fd, "peer connected");
        self.output.attach_peer(record);
        Ok(id)
    }

    // ── Readiness ────────────────────────────────────────────────

    pub fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Vec<RawFd>> {
        let mut writers = Vec::new();
        let mut backlog = Vec::new();
        for peer in self.output.peers() {
            let connection = peer.connection();
            if connection.wants_write() {
                writers.push(connection.fd());
            }
            if connection.has_buffered_input() {
                backlog.push(connection.fd());
            }
        }

        let mut ready = match self.watches.poll_ready(cx, &writers) {
            Poll::Ready(fds) => fds,
            Poll::Pending => Vec::new(),
        };
        for fd in backlog {
            if !ready.contains(&fd) {
                ready.push(fd);
            }
        }
        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    }

    /// Handle readiness on `fd`.
    pub fn dispatch(&mut self, fd: RawFd, compositor: &mut dyn Compositor) {
        match self.watches.kind(fd) {
            Some(WatchKind::Listener) => self.accept_pending(),
            Some(WatchKind::Peer(id)) => self.process_peer(id, compositor),
            None => tracing::debug!(target: "rdp", fd, "readiness on unwatched descriptor"),
        }
    }

    fn accept_pending(&mut self) {
        loop {
            let Some(listener) = self.listener.as_mut() else {
                return;
            };
            match listener.accept() {
                Ok(Some(connection)) => {
                    if let Err(e) = self.add_connection(connection) {
                        tracing::warn!("connection rejected: {e}");
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    return;
                }
            }
        }
    }

    fn process_peer(&mut self, id: PeerId, compositor: &mut dyn Compositor) {
        let Some(peer) = self.output.peer_mut(id) else {
            return;
        };
        let events = match peer.connection_mut().check_pending() {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(peer = %id, "protocol failure: {e}");
                self.teardown(id, compositor);
                return;
            }
        };

        for event in events {
            match self.handle_event(id, event, compositor) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(peer = %id, "peer disconnected");
                    self.teardown(id, compositor);
                    return;
                }
                Err(e) => {
                    tracing::warn!(peer = %id, "terminating peer: {e}");
                    self.teardown(id, compositor);
                    return;
                }
            }
        }
    }

    /// Apply one event. `Ok(false)` means the peer is done.
    fn handle_event(&mut self, id: PeerId, event: PeerEvent, compositor: &mut dyn Compositor) -> Result<bool, RdpError> {
        let mode = self.output.mode();
        match event {
            PeerEvent::Negotiated(caps) => {
                let policy = self.settings.negotiation;
                let peer = self.output.peer_mut(id).ok_or(RdpError::UnknownPeer(id))?;
                peer.negotiate(caps, &policy, mode)?;
            }
            PeerEvent::Activated => {
                let activated = self.output.activate_peer(id, compositor);
                // A mode change may have dropped other peers.
                let dropped = self.output.terminating();
                self.teardown_all(dropped, compositor);
                activated?;
            }
            PeerEvent::SuppressOutput { allow } => self.output.set_peer_output(id, allow)?,
            PeerEvent::Disconnected => return Ok(false),
            input => {
                let peer = self.output.peer_mut(id).ok_or(RdpError::UnknownPeer(id))?;
                peer.apply_input(&input, compositor, mode);
            }
        }
        Ok(true)
    }

    // ── Frames ───────────────────────────────────────────────────

    pub fn damage(&mut self, rects: &[Rect]) {
        self.output.damage(rects);
    }

    pub fn repaint(&mut self, compositor: &mut dyn Compositor, now: Instant) {
        let failed = self.output.repaint(compositor, now);
        self.teardown_all(failed, compositor);
    }

    pub fn on_timer(&mut self, compositor: &mut dyn Compositor, now: Instant) {
        let failed = self.output.on_timer(compositor, now);
        self.teardown_all(failed, compositor);
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Remove a peer from the output, drop its watch and close it.
    pub fn teardown(&mut self, id: PeerId, compositor: &mut dyn Compositor) {
        let Some(mut record) = self.output.detach_peer(id) else {
            return;
        };
        record.begin_disconnect();
        self.watches.remove(record.connection().fd());
        record.close(compositor);
    }

    fn teardown_all(&mut self, ids: Vec<PeerId>, compositor: &mut dyn Compositor) {
        for id in ids {
            self.teardown(id, compositor);
        }
    }

    /// Close every peer, then stop watching the listener.
    pub fn shutdown(&mut self, compositor: &mut dyn Compositor) {
        for id in self.output.peer_ids() {
            self.teardown(id, compositor);
        }
        if let Some(listener) = self.listener.take() {
            self.watches.remove(listener.fd());
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Waker;

    struct Ready(bool);

    impl Watch for Ready {
        fn poll_readable(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            if self.0 { Poll::Ready(Ok(())) } else { Poll::Pending }
        }

        fn poll_writable(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    /// Never readable, always writable.
    struct Writable;

    impl Watch for Writable {
        fn poll_readable(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }

        fn poll_writable(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Counted(Arc<AtomicUsize>);

    impl Watch for Counted {
        fn poll_readable(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }

        fn poll_writable(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll(table: &mut WatchTable, writers: &[RawFd]) -> Poll<Vec<RawFd>> {
        let mut cx = Context::from_waker(Waker::noop());
        table.poll_ready(&mut cx, writers)
    }

    #[test]
    fn peer_slots_are_bounded() {
        let mut table = WatchTable::new(2);
        table.insert(3, WatchKind::Listener, Box::new(Ready(false))).unwrap();
        table.insert(4, WatchKind::Peer(PeerId(1)), Box::new(Ready(false))).unwrap();
        table.insert(5, WatchKind::Peer(PeerId(2)), Box::new(Ready(false))).unwrap();

        let err = table
            .insert(6, WatchKind::Peer(PeerId(3)), Box::new(Ready(false)))
            .unwrap_err();
        assert!(matches!(err, RdpError::ResourceExhausted { capacity: 2 }));
        assert_eq!(table.len(), 3);
        assert_eq!(table.peer_count(), 2);

        table.remove(4);
        table.ensure_peer_slot().unwrap();
    }

    #[test]
    fn duplicate_descriptor_rejected() {
        let mut table = WatchTable::new(4);
        table.insert(7, WatchKind::Peer(PeerId(1)), Box::new(Ready(false))).unwrap();
        assert!(table.insert(7, WatchKind::Peer(PeerId(2)), Box::new(Ready(false))).is_err());
        assert_eq!(table.kind(7), Some(WatchKind::Peer(PeerId(1))));
    }

    #[test]
    fn removal_drops_registration() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut table = WatchTable::new(4);
        table.insert(9, WatchKind::Peer(PeerId(1)), Box::new(Counted(Arc::clone(&drops)))).unwrap();
        assert_eq!(table.remove(9), Some(WatchKind::Peer(PeerId(1))));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(!table.contains(9));
        assert_eq!(table.remove(9), None);
    }

    #[test]
    fn listener_reported_first() {
        let mut table = WatchTable::new(4);
        table.insert(2, WatchKind::Peer(PeerId(1)), Box::new(Ready(true))).unwrap();
        table.insert(8, WatchKind::Listener, Box::new(Ready(true))).unwrap();
        table.insert(5, WatchKind::Peer(PeerId(2)), Box::new(Ready(false))).unwrap();
        assert_eq!(poll(&mut table, &[]), Poll::Ready(vec![8, 2]));
    }

    #[test]
    fn nothing_ready_is_pending() {
        let mut table = WatchTable::new(1);
        table.insert(2, WatchKind::Listener, Box::new(Ready(false))).unwrap();
        assert_eq!(poll(&mut table, &[]), Poll::Pending);
    }

    #[test]
    fn writability_reported_only_for_writers() {
        let mut table = WatchTable::new(4);
        table.insert(4, WatchKind::Peer(PeerId(1)), Box::new(Writable)).unwrap();
        table.insert(6, WatchKind::Peer(PeerId(2)), Box::new(Writable)).unwrap();
        assert_eq!(poll(&mut table, &[]), Poll::Pending);
        assert_eq!(poll(&mut table, &[6]), Poll::Ready(vec![6]));
        assert_eq!(poll(&mut table, &[4, 6]), Poll::Ready(vec![4, 6]));
    }
}
