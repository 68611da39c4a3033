//! tokio-driven dispatch loop.
//!
//! Everything runs on one task: descriptor readiness, compositor
//! damage, the frame timer and shutdown are multiplexed with
//! `tokio::select!`, and each handler runs to completion before the
//! next poll. Use a current-thread runtime.

use std::future::{Future, poll_fn};
use std::io;
use std::os::fd::RawFd;
use std::task::{Context, Poll};

use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::time::{Instant as TokioInstant, sleep_until};

use crate::backend::Backend;
use crate::compositor::Compositor;
use crate::dispatcher::{Reactor, Watch};
use crate::error::RdpError;
use crate::protocol::Protocol;
use crate::types::Rect;

pub type DamageSender = mpsc::UnboundedSender<Vec<Rect>>;
pub type DamageReceiver = mpsc::UnboundedReceiver<Vec<Rect>>;

/// Channel the compositor side uses to report damage.
pub fn damage_channel() -> (DamageSender, DamageReceiver) {
    mpsc::unbounded_channel()
}

// ── tokio reactor ────────────────────────────────────────────────

/// [`Reactor`] backed by tokio's `AsyncFd`. Must be used inside a
/// runtime with I/O enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioReactor;

struct TokioWatch {
    fd: AsyncFd<RawFd>,
}

impl Reactor for TokioReactor {
    fn watch(&mut self, fd: RawFd) -> io::Result<Box<dyn Watch>> {
        Ok(Box::new(TokioWatch {
            fd: AsyncFd::new(fd)?,
        }))
    }
}

impl Watch for TokioWatch {
    fn poll_readable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.fd.poll_read_ready(cx) {
            Poll::Ready(Ok(mut guard)) => {
                // Owners either drain until WouldBlock or report
                // buffered input, so clearing now cannot lose data.
                guard.clear_ready();
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_writable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.fd.poll_write_ready(cx) {
            Poll::Ready(Ok(mut guard)) => {
                // Polled only while output is queued; the flush that
                // follows writes until WouldBlock.
                guard.clear_ready();
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ── EventLoop ────────────────────────────────────────────────────

pub struct EventLoop<P: Protocol, K: Compositor> {
    backend: Backend<P>,
    compositor: K,
    damage: DamageReceiver,
}

impl<P: Protocol, K: Compositor> EventLoop<P, K> {
    pub fn new(backend: Backend<P>, compositor: K, damage: DamageReceiver) -> Self {
        Self {
            backend,
            compositor,
            damage,
        }
    }

    pub fn backend(&self) -> &Backend<P> {
        &self.backend
    }

    pub fn compositor(&self) -> &K {
        &self.compositor
    }

    /// Start the backend if needed and run until `shutdown` resolves.
    ///
    /// Only startup failures are returned; peer errors are contained.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(Backend<P>, K), RdpError>
    where
        F: Future<Output = ()>,
    {
        if !self.backend.is_started() {
            self.backend.start()?;
        }
        tokio::pin!(shutdown);

        loop {
            let deadline = self.backend.next_deadline();
            let sleep_target = deadline
                .map(TokioInstant::from_std)
                .unwrap_or_else(TokioInstant::now);

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                ready = poll_fn(|cx| self.backend.poll_ready(cx)) => {
                    for fd in ready {
                        self.backend.dispatch(fd, &mut self.compositor);
                    }
                }
                Some(rects) = self.damage.recv() => {
                    self.backend.damage(&rects, &mut self.compositor);
                }
                _ = sleep_until(sleep_target), if deadline.is_some() => {
                    self.backend.finish_frame(&mut self.compositor, std::time::Instant::now());
                }
            }
        }

        self.backend.shutdown(&mut self.compositor);
        Ok((self.backend, self.compositor))
    }
}
