//! Detach: the engine hands the descriptor out and the user drives it with
//! blocking I/O.

use riffle::{Action, Config, Conn, Detached, Events, Options, Server};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

struct DetachOnOpen {
    handles: Mutex<mpsc::Sender<Detached>>,
    closed: Arc<AtomicUsize>,
}

impl Events for DetachOnOpen {
    fn opened(&self, _conn: &mut Conn) -> (Vec<u8>, Options, Action) {
        (Vec::new(), Options::default(), Action::Detach)
    }

    fn detached(&self, _conn: &mut Conn, handle: Detached) -> Action {
        self.handles.lock().unwrap().send(handle).unwrap();
        Action::None
    }

    fn closed(&self, _conn: &mut Conn, _err: Option<std::io::Error>) -> Action {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Action::None
    }
}

#[test]
fn detached_handle_does_blocking_io_outside_the_engine() {
    let (tx, rx) = mpsc::channel();
    let closed = Arc::new(AtomicUsize::new(0));
    let mut config = Config::new("tcp://127.0.0.1:0");
    config.workers = Some(1);
    let server = Server::bind(
        config,
        DetachOnOpen {
            handles: Mutex::new(tx),
            closed: closed.clone(),
        },
    )
    .unwrap();
    let addr = server.local_addr().ip().unwrap();
    let shutdown = server.shutdown_handle();
    let join = thread::spawn(move || server.run());

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let mut handle = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("detached callback never fired");

    // Synchronous byte I/O on the detached descriptor.
    client.write_all(b"ping").unwrap();
    let mut buf = [0u8; 4];
    handle.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");
    handle.write_all(b"pong").unwrap();
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"pong");

    // The engine is done with this connection: shutting down must neither
    // close it again nor fire `closed` for it.
    shutdown.shutdown();
    assert!(join.join().unwrap().is_ok());
    assert_eq!(closed.load(Ordering::SeqCst), 0);

    // The detached fd outlives the engine.
    client.write_all(b"late").unwrap();
    handle.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"late");

    // Dropping the handle closes the descriptor.
    drop(handle);
    let mut end = [0u8; 1];
    assert_eq!(client.read(&mut end).unwrap(), 0);
}
