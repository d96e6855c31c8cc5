//! Signal handling for graceful shutdown.

use crate::engine::ShutdownHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Install a SIGINT/SIGTERM handler that trips the engine's shutdown.
///
/// A second signal forces an immediate exit.
pub fn install(handle: ShutdownHandle) {
    let fired = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler(move || {
        if fired.swap(true, Ordering::SeqCst) {
            tracing::warn!("received second signal, forcing immediate exit");
            std::process::exit(1);
        }
        tracing::info!("received shutdown signal, stopping engine");
        handle.shutdown();
    })
    .expect("failed to set signal handler");
}
