//! Riffle: a multi-reactor, callback-driven network engine.
//!
//! Riffle pins many connections onto a small pool of single-threaded reactor
//! loops. One listener loop accepts connections and shards each new fd to a
//! worker by `fd mod N`; every worker owns a disjoint set of connections and
//! drives them off its own readiness device, so the hot path takes no locks.
//! User code supplies an [`Events`] implementation and returns buffers and
//! [`Action`]s from its callbacks.
//!
//! ```no_run
//! use riffle::{serve, Action, Config, Conn, Events};
//!
//! struct Echo;
//!
//! impl Events for Echo {
//!     fn data(&self, _conn: &mut Conn, input: Option<&[u8]>) -> (Vec<u8>, Action) {
//!         (input.map(<[u8]>::to_vec).unwrap_or_default(), Action::None)
//!     }
//! }
//!
//! serve(Config::new("tcp://127.0.0.1:6000"), Echo).unwrap();
//! ```

pub mod affinity;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod signal;

mod acceptor;
mod addr;
mod conn;
mod engine;
mod error;
mod events;
mod listener;
mod note;
mod worker;
mod workers;

pub use addr::Addr;
pub use config::Config;
pub use conn::{Conn, ConnWaker};
pub use engine::{serve, Server, ShutdownHandle};
pub use error::Error;
pub use events::{Action, Detached, Events, Options};
