//! Write backpressure: a large initial payload must survive repeated
//! partial writes across many write-ready events.

use riffle::{Action, Config, Conn, Events, Options, Server};
use std::io::Read;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

const PAYLOAD_LEN: usize = 1 << 20;

fn payload_byte(i: usize) -> u8 {
    (i % 251) as u8
}

struct Firehose;

impl Events for Firehose {
    fn opened(&self, _conn: &mut Conn) -> (Vec<u8>, Options, Action) {
        let payload: Vec<u8> = (0..PAYLOAD_LEN).map(payload_byte).collect();
        (payload, Options::default(), Action::None)
    }
}

#[test]
fn large_initial_payload_is_fully_delivered() {
    let mut config = Config::new("tcp://127.0.0.1:0");
    config.workers = Some(1);
    let server = Server::bind(config, Firehose).unwrap();
    let addr = server.local_addr().ip().unwrap();
    let shutdown = server.shutdown_handle();
    let join = thread::spawn(move || server.run());

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // Let the engine fill the socket buffers and hit WouldBlock before the
    // client drains anything.
    thread::sleep(Duration::from_millis(200));

    let mut received = vec![0u8; PAYLOAD_LEN];
    client.read_exact(&mut received).unwrap();
    for (i, &byte) in received.iter().enumerate() {
        assert_eq!(byte, payload_byte(i), "corruption at offset {i}");
    }

    drop(client);
    shutdown.shutdown();
    assert!(join.join().unwrap().is_ok());
}
