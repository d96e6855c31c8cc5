//! Listener loop: accepts new connections and shards them to workers.
//!
//! For datagram binds there is nothing to accept; the loop serves each
//! packet in place on an ephemeral connection.

use crate::addr::Addr;
use crate::conn::Conn;
use crate::engine::Shared;
use crate::error::Error;
use crate::events::{Action, Events};
use crate::listener::Listener;
use crate::metrics;
use crate::note::{Note, Registration};
use riffle_poll::{IoEvent, Poller, WakeHandle};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Scratch buffer sized for one maximal datagram.
const PACKET_SIZE: usize = 0xFFFF;

pub(crate) struct Acceptor<E> {
    poller: Poller<Note>,
    listener: Listener,
    workers: Vec<WakeHandle<Note>>,
    packet: Box<[u8]>,
    shared: Arc<Shared<E>>,
    next_serial: u64,
}

impl<E: Events> Acceptor<E> {
    pub fn new(
        poller: Poller<Note>,
        listener: Listener,
        workers: Vec<WakeHandle<Note>>,
        shared: Arc<Shared<E>>,
    ) -> Self {
        Self {
            poller,
            listener,
            workers,
            packet: vec![0; PACKET_SIZE].into_boxed_slice(),
            shared,
            next_serial: 1,
        }
    }

    /// Run until shutdown. The listener closes when the loop exits.
    pub fn run(mut self) -> Result<(), Error> {
        debug!(address = %self.listener.local_addr(), "listener loop started");
        let result = self.poll_loop();
        self.shared.shutdown.signal();
        debug!("listener loop stopped");
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
                    if matches!(note, Note::Shutdown) {
                        return Err(Error::Closing);
                    }
                }
            }
            let ready: Vec<IoEvent> = self.poller.io_events().collect();
            for ev in ready {
                if ev.fd != self.listener.fd() || !ev.readable {
                    continue;
                }
                if self.listener.is_datagram() {
                    self.serve_datagrams()?;
                } else {
                    self.accept_pending()?;
                }
            }
        }
    }

    /// Accept until the backlog reports `WouldBlock`, sharding each new fd to
    /// a worker by `fd mod N`. The worker adopts the connection on its own
    /// thread via a register note.
    fn accept_pending(&mut self) -> Result<(), Error> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(peer = %peer, error = %e, "failed to set accepted fd non-blocking");
                        continue;
                    }
                    let fd = stream.fd();
                    let local = stream
                        .local_addr()
                        .unwrap_or_else(|_| self.listener.local_addr().clone());
                    let serial = self.next_serial;
                    self.next_serial += 1;
                    let target = fd as usize % self.workers.len();
                    metrics::CONNECTIONS_ACCEPTED.increment();
                    debug!(fd, peer = %peer, worker = target, "accepted connection");
                    let note = Note::Register(Registration {
                        stream,
                        peer,
                        local,
                        serial,
                        addr_index: 0,
                    });
                    if let Err(e) = self.workers[target].wake(note) {
                        warn!(fd, error = %e, "failed to hand connection to worker");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => continue,
                Err(e) => {
                    // Per-connection failure; the next connection attempt
                    // re-arms the listener.
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Drain pending datagrams, invoking `data` once per packet on an
    /// ephemeral connection and echoing any returned bytes to the source.
    fn serve_datagrams(&mut self) -> Result<(), Error> {
        loop {
            let (n, peer) = match self.listener.recv_from(&mut self.packet) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "datagram receive failed");
                    break;
                }
            };
            if n == 0 {
                continue;
            }
            metrics::DATAGRAMS_RECEIVED.increment();
            metrics::BYTES_RECEIVED.add(n as u64);

            let mut conn = Conn::ephemeral(self.listener.local_addr().clone(), Addr::Ip(peer));
            let input = self.packet[..n].to_vec();
            let (out, action) = self.shared.events.data(&mut conn, Some(&input));
            if !out.is_empty() {
                self.shared.events.pre_write();
                match self.listener.send_to(&out, peer) {
                    Ok(sent) => {
                        metrics::BYTES_SENT.add(sent as u64);
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "datagram send failed"),
                }
            }
            if action == Action::Shutdown {
                return Err(Error::Closing);
            }
        }
        Ok(())
    }
}
