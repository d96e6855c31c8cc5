//! Worker loop: drives each owned connection's state machine off readiness
//! events and wake notes.
//!
//! The readiness device delivers edges, so every phase drains until the
//! socket reports `WouldBlock` and phases chain within a single event
//! (open, then flush, then a pending action, then reads). The interest set
//! for a connection is read+write exactly while it has outbound bytes or a
//! pending action, and read-only otherwise.

use crate::conn::Conn;
use crate::engine::Shared;
use crate::error::Error;
use crate::events::{Action, Detached, Events};
use crate::metrics;
use crate::note::{Note, Registration};
use bytes::Buf;
use riffle_poll::{IoEvent, Poller};
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Read buffer pre-allocated for every accepted connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Outcome of a single read or write attempt.
enum Phase {
    /// Made progress; re-evaluate the connection.
    Continue,
    /// The socket would block; wait for the next edge.
    Blocked,
    /// The connection was closed or detached.
    Gone,
}

pub(crate) struct Worker<E> {
    idx: usize,
    poller: Poller<Note>,
    conns: HashMap<RawFd, Conn>,
    count: Arc<AtomicI64>,
    shared: Arc<Shared<E>>,
    /// Present on the lowest-indexed worker when the ticker is enabled.
    tick_tx: Option<mpsc::Sender<Duration>>,
}

impl<E: Events> Worker<E> {
    pub fn new(
        idx: usize,
        poller: Poller<Note>,
        count: Arc<AtomicI64>,
        shared: Arc<Shared<E>>,
        tick_tx: Option<mpsc::Sender<Duration>>,
    ) -> Self {
        Self {
            idx,
            poller,
            conns: HashMap::new(),
            count,
            shared,
            tick_tx,
        }
    }

    /// Run until shutdown, then finalize every connection this loop owns.
    pub fn run(mut self) -> Result<(), Error> {
        debug!(worker = self.idx, "worker loop started");
        let result = self.poll_loop();
        self.finalize();
        self.shared.shutdown.signal();
        debug!(worker = self.idx, "worker loop stopped");
        match result {
            Err(Error::Closing) => Ok(()),
            other => other,
        }
    }

    fn poll_loop(&mut self) -> Result<(), Error> {
        loop {
            match self.poller.wait(None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            if self.poller.has_notes() {
                for note in self.poller.take_notes() {
                    self.handle_note(note)?;
                }
            }
            let ready: Vec<IoEvent> = self.poller.io_events().collect();
            for ev in ready {
                self.handle_ready(ev)?;
            }
        }
    }

    fn handle_note(&mut self, note: Note) -> Result<(), Error> {
        match note {
            Note::Shutdown => Err(Error::Closing),
            Note::Tick => self.tick(),
            Note::Wake { fd, serial } => self.wake(fd, serial),
            Note::Register(reg) => self.adopt(reg),
        }
    }

    /// Adopt a freshly accepted connection: insert it into this loop's map
    /// and register read+write interest. The first readiness event fires the
    /// `opened` callback.
    fn adopt(&mut self, reg: Registration) -> Result<(), Error> {
        let fd = reg.stream.fd();
        let conn = Conn::new(reg, self.poller.wake_handle(), READ_BUFFER_SIZE);
        if let Err(e) = self.poller.add_read_write(fd) {
            // Local to this connection; the stream closes on drop.
            warn!(fd, error = %e, "failed to register accepted connection");
            return Ok(());
        }
        self.conns.insert(fd, conn);
        self.count.fetch_add(1, Ordering::Relaxed);
        metrics::CONNECTIONS_ACTIVE.increment();
        Ok(())
    }

    /// Deliver a user wake: `data` with no input, as if the socket had been
    /// read. Stale wakes (closed or reused fd) are dropped.
    fn wake(&mut self, fd: RawFd, serial: u64) -> Result<(), Error> {
        let Some(conn) = self.conns.get_mut(&fd) else {
            return Ok(());
        };
        if conn.serial != serial {
            return Ok(());
        }
        let (out, action) = self.shared.events.data(conn, None);
        if !out.is_empty() {
            conn.out.extend_from_slice(&out);
        }
        if action != Action::None {
            conn.action = action;
        }
        if (!conn.out.is_empty() || conn.action != Action::None) && !conn.interest_write {
            self.poller.mod_read_write(fd)?;
            conn.interest_write = true;
        }
        self.drive(fd)
    }

    fn tick(&mut self) -> Result<(), Error> {
        let (delay, action) = self.shared.events.tick();
        if let Some(tx) = &self.tick_tx {
            let _ = tx.send(delay);
        }
        match action {
            Action::Shutdown => Err(Error::Closing),
            _ => Ok(()),
        }
    }

    fn handle_ready(&mut self, ev: IoEvent) -> Result<(), Error> {
        let Some(conn) = self.conns.get_mut(&ev.fd) else {
            return Ok(());
        };
        if ev.readable {
            conn.readable = true;
        }
        if ev.writable {
            conn.writable = true;
        }
        self.drive(ev.fd)
    }

    /// Push a connection forward until it blocks or goes away.
    fn drive(&mut self, fd: RawFd) -> Result<(), Error> {
        loop {
            // Re-fetch each round: any phase may remove the connection.
            let (opened, has_out, action, readable, writable) = match self.conns.get(&fd) {
                Some(c) => (c.opened, !c.out.is_empty(), c.action, c.readable, c.writable),
                None => return Ok(()),
            };

            if !opened {
                self.open(fd)?;
                continue;
            }

            if has_out {
                if !writable {
                    let Some(conn) = self.conns.get_mut(&fd) else {
                        return Ok(());
                    };
                    if !conn.interest_write {
                        self.poller.mod_read_write(fd)?;
                        conn.interest_write = true;
                    }
                    return Ok(());
                }
                match self.write_once(fd)? {
                    Phase::Continue => continue,
                    Phase::Blocked | Phase::Gone => return Ok(()),
                }
            }

            if action != Action::None {
                return self.dispatch_action(fd);
            }

            if !readable {
                return Ok(());
            }
            match self.read_once(fd)? {
                Phase::Continue => continue,
                Phase::Blocked | Phase::Gone => return Ok(()),
            }
        }
    }

    /// Fire the `opened` callback and apply the returned options.
    fn open(&mut self, fd: RawFd) -> Result<(), Error> {
        let Some(conn) = self.conns.get_mut(&fd) else {
            return Ok(());
        };
        conn.opened = true;
        let (out, opts, action) = self.shared.events.opened(conn);
        if !out.is_empty() {
            conn.out.extend_from_slice(&out);
        }
        conn.action = action;
        conn.reuse_input = opts.reuse_input_buffer;
        if let Some(idle) = opts.tcp_keep_alive {
            if let Some(stream) = conn.stream.as_ref() {
                if let Err(e) = stream.set_keepalive(idle) {
                    warn!(fd, error = %e, "failed to arm tcp keep-alive");
                }
            }
        }
        if conn.out.is_empty() && conn.action == Action::None {
            self.poller.mod_read(fd)?;
            conn.interest_write = false;
        }
        Ok(())
    }

    /// One write attempt against the outbound buffer.
    fn write_once(&mut self, fd: RawFd) -> Result<Phase, Error> {
        self.shared.events.pre_write();
        let Some(conn) = self.conns.get_mut(&fd) else {
            return Ok(Phase::Gone);
        };
        let Some(stream) = conn.stream.as_mut() else {
            return Ok(Phase::Gone);
        };
        match stream.write(&conn.out) {
            Ok(0) => {
                let err = io::Error::new(io::ErrorKind::WriteZero, "socket accepted no bytes");
                self.close_conn(fd, Some(err))?;
                Ok(Phase::Gone)
            }
            Ok(n) => {
                metrics::BYTES_SENT.add(n as u64);
                conn.out.advance(n);
                if conn.out.is_empty() && conn.action == Action::None {
                    self.poller.mod_read(fd)?;
                    conn.interest_write = false;
                }
                Ok(Phase::Continue)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.writable = false;
                if !conn.interest_write {
                    self.poller.mod_read_write(fd)?;
                    conn.interest_write = true;
                }
                Ok(Phase::Blocked)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Phase::Continue),
            Err(e) => {
                self.close_conn(fd, Some(e))?;
                Ok(Phase::Gone)
            }
        }
    }

    /// One read attempt followed by the `data` callback.
    fn read_once(&mut self, fd: RawFd) -> Result<Phase, Error> {
        let Some(conn) = self.conns.get_mut(&fd) else {
            return Ok(Phase::Gone);
        };
        let Some(stream) = conn.stream.as_mut() else {
            return Ok(Phase::Gone);
        };
        // The buffer is taken out so the callback can borrow it alongside
        // the connection.
        let mut buf = mem::take(&mut conn.in_buf);
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                conn.in_buf = buf;
                let err = io::Error::from(io::ErrorKind::UnexpectedEof);
                self.close_conn(fd, Some(err))?;
                return Ok(Phase::Gone);
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.readable = false;
                conn.in_buf = buf;
                return Ok(Phase::Blocked);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                conn.in_buf = buf;
                return Ok(Phase::Continue);
            }
            Err(e) => {
                conn.in_buf = buf;
                self.close_conn(fd, Some(e))?;
                return Ok(Phase::Gone);
            }
        };
        metrics::BYTES_RECEIVED.add(n as u64);

        let (out, action) = if conn.reuse_input {
            self.shared.events.data(conn, Some(&buf[..n]))
        } else {
            let copy = buf[..n].to_vec();
            self.shared.events.data(conn, Some(&copy))
        };
        conn.in_buf = buf;
        if !out.is_empty() {
            conn.out.extend_from_slice(&out);
        }
        if action != Action::None {
            conn.action = action;
        }
        if (!conn.out.is_empty() || conn.action != Action::None) && !conn.interest_write {
            self.poller.mod_read_write(fd)?;
            conn.interest_write = true;
        }
        Ok(Phase::Continue)
    }

    /// Dispatch the pending action once the outbound buffer has drained.
    fn dispatch_action(&mut self, fd: RawFd) -> Result<(), Error> {
        let Some(conn) = self.conns.get_mut(&fd) else {
            return Ok(());
        };
        let action = mem::replace(&mut conn.action, Action::None);
        match action {
            Action::None => Ok(()),
            Action::Close => self.close_conn(fd, None),
            Action::Shutdown => Err(Error::Closing),
            Action::Detach => self.detach_conn(fd),
        }
    }

    /// Close the fd, drop the connection from the map, and fire `closed`.
    fn close_conn(&mut self, fd: RawFd, err: Option<io::Error>) -> Result<(), Error> {
        let Some(mut conn) = self.conns.remove(&fd) else {
            return Ok(());
        };
        let _ = self.poller.detach(fd);
        drop(conn.stream.take());
        self.count.fetch_sub(1, Ordering::Relaxed);
        metrics::CONNECTIONS_ACTIVE.decrement();
        metrics::CONNECTIONS_CLOSED.increment();
        match self.shared.events.closed(&mut conn, err) {
            Action::Shutdown => Err(Error::Closing),
            _ => Ok(()),
        }
    }

    /// Transfer the fd out of the engine and fire `detached`.
    fn detach_conn(&mut self, fd: RawFd) -> Result<(), Error> {
        let Some(mut conn) = self.conns.remove(&fd) else {
            return Ok(());
        };
        let Some(stream) = conn.stream.take() else {
            return Ok(());
        };
        let _ = self.poller.detach(fd);
        self.count.fetch_sub(1, Ordering::Relaxed);
        metrics::CONNECTIONS_ACTIVE.decrement();
        if let Err(e) = stream.set_nonblocking(false) {
            drop(stream);
            return match self.shared.events.closed(&mut conn, Some(e)) {
                Action::Shutdown => Err(Error::Closing),
                _ => Ok(()),
            };
        }
        metrics::CONNECTIONS_DETACHED.increment();
        let handle = Detached::new(stream.into_owned_fd());
        match self.shared.events.detached(&mut conn, handle) {
            Action::Shutdown => Err(Error::Closing),
            _ => Ok(()),
        }
    }

    /// Close every connection still owned by this loop, firing `closed` with
    /// no error. Runs on the loop's own thread after it leaves the poll loop.
    fn finalize(&mut self) {
        let fds: Vec<RawFd> = self.conns.keys().copied().collect();
        for fd in fds {
            let _ = self.close_conn(fd, None);
        }
    }
}
