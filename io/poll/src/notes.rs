//! Thread-safe FIFO of opaque notes posted to a loop.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Unbounded mutex-guarded queue of notes.
///
/// Producers push from any thread; the owning loop drains the whole queue in
/// one call. The lock is released before any drained note is handled.
pub struct NoteQueue<T> {
    notes: Mutex<VecDeque<T>>,
}

impl<T> NoteQueue<T> {
    pub fn new() -> Self {
        Self {
            notes: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a note. Safe to call from any thread.
    pub fn push(&self, note: T) {
        self.notes.lock().push_back(note);
    }

    pub fn len(&self) -> usize {
        self.notes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.lock().is_empty()
    }

    /// Remove and return every queued note in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        let mut notes = self.notes.lock();
        notes.drain(..).collect()
    }
}

impl<T> Default for NoteQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn drain_preserves_fifo_order() {
        let queue = NoteQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.drain(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_on_empty_queue() {
        let queue: NoteQueue<u32> = NoteQueue::new();
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn pushes_from_multiple_threads_all_surface() {
        let queue = Arc::new(NoteQueue::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let queue = queue.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    queue.push(t * 100 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 400);
        let mut drained = queue.drain();
        drained.sort_unstable();
        assert_eq!(drained, (0..400).collect::<Vec<_>>());
    }
}
