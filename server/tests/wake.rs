//! Cross-thread wakes: `data` fires with no input, once per wake, on the
//! owning worker's thread.

use riffle::{Action, Config, Conn, ConnWaker, Events, Options, Server};
use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct WakeEcho {
    waker: Mutex<Option<ConnWaker>>,
    wakes_seen: AtomicUsize,
    data_with_input: AtomicUsize,
}

impl Events for WakeEcho {
    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Options, Action) {
        *self.waker.lock().unwrap() = conn.waker();
        (Vec::new(), Options::default(), Action::None)
    }

    fn data(&self, _conn: &mut Conn, input: Option<&[u8]>) -> (Vec<u8>, Action) {
        match input {
            Some(_) => {
                self.data_with_input.fetch_add(1, Ordering::SeqCst);
                (Vec::new(), Action::None)
            }
            None => {
                self.wakes_seen.fetch_add(1, Ordering::SeqCst);
                // One observable byte per wake delivery.
                (b"w".to_vec(), Action::None)
            }
        }
    }
}

fn wait_until(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    pred()
}

#[test]
fn each_wake_delivers_exactly_one_nil_data() {
    let events = Arc::new(WakeEcho::default());
    let mut config = Config::new("tcp://127.0.0.1:0");
    config.workers = Some(2);
    let server = Server::bind(config, ArcEvents(events.clone())).unwrap();
    let addr = server.local_addr().ip().unwrap();
    let shutdown = server.shutdown_handle();
    let join = thread::spawn(move || server.run());

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    // `opened` runs on the first readiness event after adoption.
    assert!(wait_until(Duration::from_secs(2), || {
        events.waker.lock().unwrap().is_some()
    }));
    let waker = events.waker.lock().unwrap().clone().unwrap();

    // Wakes posted from a foreign thread.
    let poster = thread::spawn(move || {
        for _ in 0..3 {
            waker.wake().unwrap();
        }
    });
    poster.join().unwrap();

    let mut buf = [0u8; 3];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"www");
    assert_eq!(events.wakes_seen.load(Ordering::SeqCst), 3);

    // No spurious deliveries afterwards.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(events.wakes_seen.load(Ordering::SeqCst), 3);
    assert_eq!(events.data_with_input.load(Ordering::SeqCst), 0);

    drop(client);
    shutdown.shutdown();
    assert!(join.join().unwrap().is_ok());
}

#[test]
fn wakes_for_a_closed_connection_are_dropped() {
    let events = Arc::new(WakeEcho::default());
    let mut config = Config::new("tcp://127.0.0.1:0");
    config.workers = Some(1);
    let server = Server::bind(config, ArcEvents(events.clone())).unwrap();
    let addr = server.local_addr().ip().unwrap();
    let shutdown = server.shutdown_handle();
    let join = thread::spawn(move || server.run());

    let client = TcpStream::connect(addr).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        events.waker.lock().unwrap().is_some()
    }));
    let waker = events.waker.lock().unwrap().clone().unwrap();

    drop(client);
    // Wait until the engine has observed the close, then wake the ghost.
    thread::sleep(Duration::from_millis(200));
    waker.wake().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(events.wakes_seen.load(Ordering::SeqCst), 0);

    shutdown.shutdown();
    assert!(join.join().unwrap().is_ok());
}

/// Adapter so one `Events` value can be observed by the test and owned by
/// the engine at the same time.
struct ArcEvents(Arc<WakeEcho>);

impl Events for ArcEvents {
    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Options, Action) {
        self.0.opened(conn)
    }

    fn data(&self, conn: &mut Conn, input: Option<&[u8]>) -> (Vec<u8>, Action) {
        self.0.data(conn, input)
    }
}
