//! Kernel readiness multiplexer with a cross-thread wake channel.

use crate::notes::NoteQueue;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Token reserved for the wake handle; never a valid fd.
const WAKE: Token = Token(usize::MAX);

/// One readiness event for a registered descriptor.
///
/// Peer hangup and socket errors are folded into `readable` so that the next
/// read observes them (a zero-length read or the pending error).
#[derive(Debug, Clone, Copy)]
pub struct IoEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

/// Readiness device owned by a single loop thread.
///
/// Registration and interest changes are keyed by raw fd; the fd itself is
/// the event token. Only [`Poller::wait`] requires `&mut self`; interest
/// changes and note draining may interleave with event iteration.
pub struct Poller<T> {
    poll: Poll,
    events: Events,
    notes: Arc<NoteQueue<T>>,
    waker: Arc<Waker>,
}

impl<T: Send> Poller<T> {
    /// Create the multiplexer and its wake handle.
    ///
    /// Fails only on kernel resource exhaustion, which is fatal at startup.
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            notes: Arc::new(NoteQueue::new()),
            waker,
        })
    }

    /// Handle for posting notes to this device from any thread.
    pub fn wake_handle(&self) -> WakeHandle<T> {
        WakeHandle {
            notes: self.notes.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Register a new descriptor with read-only interest.
    pub fn add_read(&self, fd: RawFd) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)
    }

    /// Register a new descriptor with read+write interest.
    pub fn add_read_write(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().register(
            &mut SourceFd(&fd),
            Token(fd as usize),
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    /// Narrow an already-registered descriptor to read-only interest.
    pub fn mod_read(&self, fd: RawFd) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)
    }

    /// Widen an already-registered descriptor to read+write interest.
    pub fn mod_read_write(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().reregister(
            &mut SourceFd(&fd),
            Token(fd as usize),
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    /// Remove a descriptor from the interest set without closing it.
    pub fn detach(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    /// Block until at least one descriptor is ready or a note arrives.
    ///
    /// An interrupted wait surfaces as `ErrorKind::Interrupted`; callers
    /// retry without touching the event set.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(&mut self.events, timeout)
    }

    /// Readiness events from the last `wait`, wake events filtered out.
    pub fn io_events(&self) -> impl Iterator<Item = IoEvent> + '_ {
        self.events
            .iter()
            .filter(|event| event.token() != WAKE)
            .map(|event| IoEvent {
                fd: event.token().0 as RawFd,
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable() || event.is_write_closed(),
            })
    }

    pub fn has_notes(&self) -> bool {
        !self.notes.is_empty()
    }

    /// Drain every pending note in posting order.
    pub fn take_notes(&self) -> Vec<T> {
        self.notes.drain()
    }
}

/// Cloneable, `Send` handle for posting notes to a [`Poller`].
pub struct WakeHandle<T> {
    notes: Arc<NoteQueue<T>>,
    waker: Arc<Waker>,
}

impl<T: Send> WakeHandle<T> {
    /// Enqueue `note` and force the device's next wait to return.
    ///
    /// Any number of pending notes coalesce into a single wakeup; the owning
    /// loop drains the whole queue when it wakes.
    pub fn wake(&self, note: T) -> io::Result<()> {
        self.notes.push(note);
        self.waker.wake()
    }
}

impl<T> Clone for WakeHandle<T> {
    fn clone(&self) -> Self {
        Self {
            notes: self.notes.clone(),
            waker: self.waker.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poller_starts_empty() {
        let poller: Poller<u32> = Poller::new().unwrap();
        assert!(!poller.has_notes());
        assert!(poller.take_notes().is_empty());
    }

    #[test]
    fn wait_times_out_with_no_events() {
        let mut poller: Poller<u32> = Poller::new().unwrap();
        poller.wait(Some(Duration::from_millis(1))).unwrap();
        assert_eq!(poller.io_events().count(), 0);
    }

    #[test]
    fn detach_unknown_fd_is_an_error() {
        let poller: Poller<u32> = Poller::new().unwrap();
        assert!(poller.detach(999).is_err());
    }
}
