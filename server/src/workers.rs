//! Loop thread management utilities.

use crate::affinity::set_cpu_affinity;
use crate::error::Error;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// Spawn a named loop thread, optionally pinned to a CPU.
pub(crate) fn spawn_loop<F>(
    name: &str,
    cpu: Option<usize>,
    body: F,
) -> JoinHandle<Result<(), Error>>
where
    F: FnOnce() -> Result<(), Error> + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            if let Some(cpu) = cpu {
                if let Err(e) = set_cpu_affinity(cpu) {
                    warn!(cpu, error = %e, "failed to set cpu affinity");
                }
            }
            body()
        })
        .expect("failed to spawn loop thread")
}
