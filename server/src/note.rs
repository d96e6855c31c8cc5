//! Control notes posted to a loop's wake queue.

use crate::addr::Addr;
use crate::listener::Stream;
use std::os::unix::io::RawFd;

/// Out-of-band message delivered through a loop's readiness device.
pub(crate) enum Note {
    /// Stop the receiving loop.
    Shutdown,
    /// Global timer tick; handled by the lowest-indexed worker.
    Tick,
    /// User wake for a connection owned by the receiving loop.
    ///
    /// `serial` guards against fd reuse: a wake whose serial no longer
    /// matches the fd's current occupant is dropped.
    Wake { fd: RawFd, serial: u64 },
    /// A freshly accepted connection for the receiving worker to adopt.
    Register(Registration),
}

/// Everything the worker needs to adopt an accepted connection.
pub(crate) struct Registration {
    pub stream: Stream,
    pub peer: Addr,
    pub local: Addr,
    pub serial: u64,
    pub addr_index: usize,
}
