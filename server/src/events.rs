//! The user-facing callback surface.
//!
//! An [`Events`] implementation is shared by every loop; exactly one callback
//! runs on a given loop at a time, and callbacks must not block. Per
//! connection, the callback sequence is always
//! `opened (data)* (closed | detached)`.

use crate::conn::Conn;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// What the engine should do with a connection after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Keep serving the connection.
    #[default]
    None,
    /// Close the connection once pending output has been flushed.
    Close,
    /// Shut the whole engine down.
    Shutdown,
    /// Hand the connection's descriptor out of the engine.
    Detach,
}

/// Per-connection options returned from [`Events::opened`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Hand the loop's inbound buffer to [`Events::data`] without copying.
    pub reuse_input_buffer: bool,
    /// Arm the kernel TCP keep-alive timer with this idle time.
    pub tcp_keep_alive: Option<Duration>,
}

/// User event callbacks consumed by the engine.
///
/// Every method has a default implementation, so an implementation overrides
/// only what it needs. The ticker ([`Events::tick`]) only runs when enabled
/// in the configuration.
pub trait Events: Send + Sync + 'static {
    /// A connection has entered its worker loop. Fires exactly once per
    /// connection, before any `data`.
    ///
    /// The returned bytes become the connection's outbound buffer.
    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Options, Action) {
        let _ = conn;
        (Vec::new(), Options::default(), Action::None)
    }

    /// The connection is being finalized. `err` carries the terminal I/O
    /// error, or `None` for engine-initiated closes.
    ///
    /// Only [`Action::Shutdown`] is honored here.
    fn closed(&self, conn: &mut Conn, err: Option<io::Error>) -> Action {
        let _ = (conn, err);
        Action::None
    }

    /// Inbound bytes arrived (`Some`), or a wake was delivered (`None`).
    ///
    /// For datagram listeners this fires once per datagram on an ephemeral
    /// connection, and the returned bytes are sent back to the datagram's
    /// source.
    fn data(&self, conn: &mut Conn, input: Option<&[u8]>) -> (Vec<u8>, Action) {
        let _ = (conn, input);
        (Vec::new(), Action::None)
    }

    /// A [`Action::Detach`] resolved; `handle` owns the descriptor, restored
    /// to blocking mode. Dropping the handle closes it.
    fn detached(&self, conn: &mut Conn, handle: Detached) -> Action {
        let _ = (conn, handle);
        Action::None
    }

    /// Fires immediately before every socket write.
    fn pre_write(&self) {}

    /// Global timer callback; the engine waits the returned delay before the
    /// next invocation.
    fn tick(&self) -> (Duration, Action) {
        (Duration::from_secs(1), Action::None)
    }
}

/// A connection transferred out of the engine.
///
/// The descriptor is back in blocking mode and no longer registered with any
/// readiness device; reads and writes block like ordinary socket I/O. The
/// descriptor closes when the handle drops.
#[derive(Debug)]
pub struct Detached {
    fd: OwnedFd,
}

impl Detached {
    pub(crate) fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Close the descriptor.
    pub fn close(self) {}

    /// Take the raw descriptor; the caller becomes responsible for closing.
    pub fn into_owned_fd(self) -> OwnedFd {
        self.fd
    }
}

impl AsRawFd for Detached {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for Detached {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl Read for Detached {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Write for Detached {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let n = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    buf.as_ptr().cast::<libc::c_void>(),
                    buf.len(),
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
