//! Non-blocking TCP implementation of the protocol traits.
//!
//! Reads take at most [`MAX_READ_PER_DISPATCH`] bytes per call and
//! decode every complete frame; a socket left undrained is reported
//! through `has_buffered_input`. Writes are attempted immediately.
//! Whatever the kernel does not take is kept, up to
//! [`MAX_PENDING_WRITE`] bytes, and flushed when the socket turns
//! writable.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use bytes::{Buf, BytesMut};

use crate::codec::EncodedUpdate;
use crate::error::RdpError;
use crate::protocol::{NegotiatedSettings, PeerConnection, PeerEvent, Protocol, ProtocolListener};
use crate::wire::{ClientPdu, MAX_FRAME_LENGTH, ServerPduRef, WireCodec};

/// Unsent bytes tolerated before a slow peer is dropped.
pub const MAX_PENDING_WRITE: usize = 4 * MAX_FRAME_LENGTH;

const READ_CHUNK: usize = 16 * 1024;

/// Bytes read from one peer per dispatch.
pub const MAX_READ_PER_DISPATCH: usize = 4 * READ_CHUNK;

// ── TcpProtocol ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProtocol;

impl Protocol for TcpProtocol {
    type Connection = TcpPeer;
    type Listener = TcpPeerListener;

    fn listen(&self, addr: SocketAddr) -> Result<TcpPeerListener, RdpError> {
        let inner = TcpListener::bind(addr)?;
        inner.set_nonblocking(true)?;
        Ok(TcpPeerListener { inner })
    }

    fn adopt(&self, fd: OwnedFd) -> Result<TcpPeer, RdpError> {
        let stream = TcpStream::from(fd);
        let name = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| String::from("external"));
        TcpPeer::new(stream, name)
    }
}

// ── TcpPeerListener ──────────────────────────────────────────────

#[derive(Debug)]
pub struct TcpPeerListener {
    inner: TcpListener,
}

impl TcpPeerListener {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl ProtocolListener for TcpPeerListener {
    type Connection = TcpPeer;

    fn fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    fn accept(&mut self) -> Result<Option<TcpPeer>, RdpError> {
        match self.inner.accept() {
            Ok((stream, addr)) => TcpPeer::new(stream, addr.to_string()).map(Some),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ── TcpPeer ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TcpPeer {
    stream: TcpStream,
    name: String,
    codec: WireCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    read_budget: usize,
    more_input: bool,
    closed: bool,
}

impl TcpPeer {
    fn new(stream: TcpStream, name: String) -> Result<Self, RdpError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            name,
            codec: WireCodec::default(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            read_budget: MAX_READ_PER_DISPATCH,
            more_input: false,
            closed: false,
        })
    }

    fn send(&mut self, pdu: &ServerPduRef<'_>) -> Result<(), RdpError> {
        if self.closed {
            return Err(RdpError::Protocol("connection closed".into()));
        }
        self.codec.encode(pdu, &mut self.write_buf)?;
        self.flush()?;
        if self.write_buf.len() > MAX_PENDING_WRITE {
            return Err(RdpError::Protocol(format!(
                "{} bytes unsent, peer is not reading",
                self.write_buf.len()
            )));
        }
        Ok(())
    }

    /// Write as much as the socket takes without blocking.
    fn flush(&mut self) -> Result<(), RdpError> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(RdpError::Protocol("peer stopped reading".into())),
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl PeerConnection for TcpPeer {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn peer_name(&self) -> String {
        self.name.clone()
    }

    fn check_pending(&mut self) -> Result<Vec<PeerEvent>, RdpError> {
        let mut eof = false;
        let mut budget = self.read_budget;
        let mut chunk = [0u8; READ_CHUNK];
        self.more_input = false;
        loop {
            if budget == 0 {
                self.more_input = true;
                break;
            }
            let want = budget.min(READ_CHUNK);
            match self.stream.read(&mut chunk[..want]) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    budget -= n;
                    self.read_buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut events = Vec::new();
        while let Some(pdu) = self.codec.decode::<ClientPdu>(&mut self.read_buf)? {
            events.push(PeerEvent::from(pdu));
        }
        if eof {
            events.push(PeerEvent::Disconnected);
        }
        self.flush()?;
        Ok(events)
    }

    fn wants_write(&self) -> bool {
        !self.closed && !self.write_buf.is_empty()
    }

    fn has_buffered_input(&self) -> bool {
        !self.closed && self.more_input
    }

    fn accept_settings(&mut self, settings: &NegotiatedSettings) -> Result<(), RdpError> {
        self.send(&ServerPduRef::Settings(*settings))
    }

    fn resize_desktop(&mut self, width: u32, height: u32) -> Result<(), RdpError> {
        self.send(&ServerPduRef::DesktopResize { width, height })
    }

    fn send_update(&mut self, update: &EncodedUpdate<'_>) -> Result<(), RdpError> {
        self.send(&ServerPduRef::from(update))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.flush() {
            tracing::debug!(target: "rdp", peer = %self.name, "final flush failed: {e}");
        }
        // The peer may already be gone.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

// ── Tests ────────────────────────────────────────────────────────
