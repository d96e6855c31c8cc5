//! Bootstrap and supervision: builds the listener and loops, runs them on
//! dedicated threads, and coordinates shutdown.

use crate::acceptor::Acceptor;
use crate::addr::{self, Addr};
use crate::affinity;
use crate::config::Config;
use crate::error::Error;
use crate::events::Events;
use crate::listener::Listener;
use crate::note::Note;
use crate::worker::Worker;
use crate::workers::spawn_loop;
use parking_lot::{Condvar, Mutex};
use riffle_poll::{Poller, WakeHandle};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Condition-variable shutdown signal shared by every loop.
pub(crate) struct ShutdownSignal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.cond.wait(&mut flag);
        }
    }

    /// Wait up to `timeout`; returns true once shutdown has been signaled.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock();
        if !*flag {
            self.cond.wait_for(&mut flag, timeout);
        }
        *flag
    }
}

/// State shared by every loop of one engine.
pub(crate) struct Shared<E> {
    pub events: E,
    pub shutdown: Arc<ShutdownSignal>,
}

/// Trips the engine's shutdown from outside its loops.
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown: Arc<ShutdownSignal>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.shutdown.signal();
    }
}

/// A bound, not-yet-running engine.
///
/// `bind` performs every fallible startup step (address parsing, socket
/// binding, readiness-device creation); [`Server::run`] then launches the
/// loops and blocks until shutdown.
pub struct Server<E> {
    acceptor: Acceptor<E>,
    acceptor_handle: WakeHandle<Note>,
    workers: Vec<Worker<E>>,
    worker_handles: Vec<WakeHandle<Note>>,
    counts: Vec<Arc<AtomicI64>>,
    tick_rx: Option<mpsc::Receiver<Duration>>,
    cpus: Option<Vec<usize>>,
    shutdown: Arc<ShutdownSignal>,
    local: Addr,
}

impl<E: Events> Server<E> {
    /// Parse the address, bind the listener, and construct every loop.
    pub fn bind(config: Config, events: E) -> Result<Self, Error> {
        let parsed = addr::parse(&config.address)?;
        let listener = Listener::bind(&parsed)?;
        let local = listener.local_addr().clone();

        let cpus = config
            .cpu_affinity
            .as_deref()
            .map(affinity::parse_cpu_list)
            .transpose()?;

        let shutdown = Arc::new(ShutdownSignal::new());
        let shared = Arc::new(Shared {
            events,
            shutdown: shutdown.clone(),
        });

        let num_workers = config.worker_count();
        let (tick_tx, tick_rx) = if config.tick {
            let (tx, rx) = mpsc::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let mut workers = Vec::with_capacity(num_workers);
        let mut worker_handles = Vec::with_capacity(num_workers);
        let mut counts = Vec::with_capacity(num_workers);
        for idx in 0..num_workers {
            let poller = Poller::new()?;
            worker_handles.push(poller.wake_handle());
            let count = Arc::new(AtomicI64::new(0));
            counts.push(count.clone());
            // The ticker is serialized through the lowest-indexed worker.
            let tick_tx = if idx == 0 { tick_tx.clone() } else { None };
            workers.push(Worker::new(idx, poller, count, shared.clone(), tick_tx));
        }

        let poller = Poller::new()?;
        poller.add_read(listener.fd())?;
        let acceptor_handle = poller.wake_handle();
        let acceptor = Acceptor::new(poller, listener, worker_handles.clone(), shared);

        info!(address = %local, workers = num_workers, "engine listening");
        Ok(Self {
            acceptor,
            acceptor_handle,
            workers,
            worker_handles,
            counts,
            tick_rx,
            cpus,
            shutdown,
            local,
        })
    }

    /// The address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> &Addr {
        &self.local
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Launch every loop and block until the engine shuts down.
    ///
    /// Shutdown begins when any loop exits (a callback returned
    /// [`crate::Action::Shutdown`], a fatal loop error) or when a
    /// [`ShutdownHandle`] is tripped. The supervisor then stops every other
    /// loop; each worker finalizes its own connections on its own thread.
    pub fn run(self) -> Result<(), Error> {
        let Server {
            acceptor,
            acceptor_handle,
            workers,
            worker_handles,
            counts,
            tick_rx,
            cpus,
            shutdown,
            local,
        } = self;

        let mut handles = Vec::with_capacity(workers.len() + 1);
        for (idx, worker) in workers.into_iter().enumerate() {
            let cpu = cpus.as_ref().map(|cpus| cpus[idx % cpus.len()]);
            handles.push(spawn_loop(&format!("worker-{idx}"), cpu, move || {
                worker.run()
            }));
        }
        handles.push(spawn_loop("listener", None, move || acceptor.run()));

        let ticker = tick_rx.map(|rx| {
            let handle = worker_handles[0].clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("ticker".to_string())
                .spawn(move || run_ticker(handle, rx, shutdown))
                .expect("failed to spawn ticker thread")
        });

        shutdown.wait();
        for handle in &worker_handles {
            let _ = handle.wake(Note::Shutdown);
        }
        let _ = acceptor_handle.wake(Note::Shutdown);

        let mut result = Ok(());
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "loop exited with error");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
                Err(_) => warn!("loop thread panicked"),
            }
        }
        if let Some(ticker) = ticker {
            let _ = ticker.join();
        }

        let remaining: i64 = counts.iter().map(|c| c.load(Ordering::Relaxed)).sum();
        debug!(address = %local, remaining, "engine stopped");
        result
    }
}

/// Bind and run in one call.
pub fn serve<E: Events>(config: Config, events: E) -> Result<(), Error> {
    Server::bind(config, events)?.run()
}

/// Single-fire-at-a-time timer serialized through worker 0: post a tick note,
/// then sleep for whatever delay the `tick` callback returned. Exits when
/// shutdown is signaled or the worker goes away.
fn run_ticker(
    handle: WakeHandle<Note>,
    rx: mpsc::Receiver<Duration>,
    shutdown: Arc<ShutdownSignal>,
) {
    let mut delay = Duration::ZERO;
    loop {
        if shutdown.wait_timeout(delay) {
            break;
        }
        if handle.wake(Note::Tick).is_err() {
            break;
        }
        match rx.recv() {
            Ok(next) => delay = next,
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_signal_wakes_waiters() {
        let signal = Arc::new(ShutdownSignal::new());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait())
        };
        thread::sleep(Duration::from_millis(20));
        signal.signal();
        waiter.join().unwrap();
    }

    #[test]
    fn wait_timeout_reports_signal_state() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
        signal.signal();
        assert!(signal.wait_timeout(Duration::from_millis(1)));
    }
}
