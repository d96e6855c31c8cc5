//! Per-connection state and the handles exposed to callbacks.

use crate::addr::Addr;
use crate::events::Action;
use crate::listener::Stream;
use crate::note::{Note, Registration};
use bytes::BytesMut;
use riffle_poll::WakeHandle;
use std::any::Any;
use std::io;
use std::os::unix::io::RawFd;

/// A connection pinned to one worker loop for its entire lifetime.
///
/// Callbacks receive `&mut Conn`; the engine owns the connection and only
/// the owning worker's thread ever touches it.
pub struct Conn {
    pub(crate) fd: RawFd,
    pub(crate) serial: u64,
    pub(crate) stream: Option<Stream>,
    pub(crate) addr_index: usize,
    pub(crate) local: Addr,
    pub(crate) remote: Addr,
    /// Outbound bytes not yet written to the socket.
    pub(crate) out: BytesMut,
    /// Reusable inbound read buffer.
    pub(crate) in_buf: Vec<u8>,
    pub(crate) reuse_input: bool,
    pub(crate) opened: bool,
    pub(crate) action: Action,
    /// Last observed readiness edges, cleared on `WouldBlock`.
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    /// Whether the registered interest currently includes write.
    pub(crate) interest_write: bool,
    ctx: Option<Box<dyn Any + Send>>,
    wake: Option<WakeHandle<Note>>,
}

impl Conn {
    pub(crate) fn new(
        reg: Registration,
        wake: WakeHandle<Note>,
        read_buffer_size: usize,
    ) -> Self {
        let fd = reg.stream.fd();
        Self {
            fd,
            serial: reg.serial,
            stream: Some(reg.stream),
            addr_index: reg.addr_index,
            local: reg.local,
            remote: reg.peer,
            out: BytesMut::new(),
            in_buf: vec![0; read_buffer_size],
            reuse_input: false,
            opened: false,
            action: Action::None,
            readable: false,
            writable: false,
            interest_write: true,
            ctx: None,
            wake: Some(wake),
        }
    }

    /// A connection synthesized for a single datagram. It owns no socket and
    /// is dropped as soon as the `data` callback returns.
    pub(crate) fn ephemeral(local: Addr, remote: Addr) -> Self {
        Self {
            fd: -1,
            serial: 0,
            stream: None,
            addr_index: 0,
            local,
            remote,
            out: BytesMut::new(),
            in_buf: Vec::new(),
            reuse_input: false,
            opened: true,
            action: Action::None,
            readable: false,
            writable: false,
            interest_write: false,
            ctx: None,
            wake: None,
        }
    }

    /// Opaque per-connection slot.
    pub fn context(&self) -> Option<&(dyn Any + Send)> {
        self.ctx.as_deref()
    }

    pub fn context_mut(&mut self) -> Option<&mut (dyn Any + Send)> {
        self.ctx.as_deref_mut()
    }

    pub fn set_context(&mut self, ctx: Box<dyn Any + Send>) {
        self.ctx = Some(ctx);
    }

    pub fn take_context(&mut self) -> Option<Box<dyn Any + Send>> {
        self.ctx.take()
    }

    /// Index of the listener this connection arrived on.
    pub fn addr_index(&self) -> usize {
        self.addr_index
    }

    pub fn local_addr(&self) -> &Addr {
        &self.local
    }

    pub fn remote_addr(&self) -> &Addr {
        &self.remote
    }

    /// Post a wake note to the owning loop; `data` fires there with `None`
    /// input. No-op for datagram connections.
    pub fn wake(&self) -> io::Result<()> {
        match self.waker() {
            Some(waker) => waker.wake(),
            None => Ok(()),
        }
    }

    /// A cloneable handle for waking this connection from other threads.
    /// `None` for datagram connections.
    pub fn waker(&self) -> Option<ConnWaker> {
        self.wake.as_ref().map(|handle| ConnWaker {
            fd: self.fd,
            serial: self.serial,
            handle: handle.clone(),
        })
    }
}

/// Wakes one connection's owning loop from any thread.
///
/// A waker outliving its connection is harmless: the wake is dropped once
/// the fd slot is vacated or reused.
#[derive(Clone)]
pub struct ConnWaker {
    fd: RawFd,
    serial: u64,
    handle: WakeHandle<Note>,
}

impl ConnWaker {
    pub fn wake(&self) -> io::Result<()> {
        self.handle.wake(Note::Wake {
            fd: self.fd,
            serial: self.serial,
        })
    }
}
