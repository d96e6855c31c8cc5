//! riffle-poll - readiness device for single-threaded reactor loops.
//!
//! Each loop owns one [`Poller`]: a kernel readiness multiplexer (epoll on
//! Linux, kqueue on the BSDs and macOS, via mio) paired with a wake handle
//! and a thread-safe note queue. Descriptors are registered by their raw fd
//! and come back as that same fd in readiness events, so the owning loop can
//! resolve fd -> state in O(1).
//!
//! Cross-thread control flows through [`WakeHandle::wake`]: the note lands in
//! the queue and the next (or current) [`Poller::wait`] is forced to return.
//! Multiple pending notes coalesce into a single wakeup.
//!
//! ```ignore
//! let mut poller: Poller<String> = Poller::new()?;
//! let handle = poller.wake_handle();
//!
//! std::thread::spawn(move || handle.wake("ping".to_string()));
//!
//! poller.wait(None)?;
//! for note in poller.take_notes() {
//!     println!("note: {}", note);
//! }
//! for ev in poller.io_events() {
//!     println!("fd {} ready (r={} w={})", ev.fd, ev.readable, ev.writable);
//! }
//! ```

mod notes;
mod poller;

pub use notes::NoteQueue;
pub use poller::{IoEvent, Poller, WakeHandle};
