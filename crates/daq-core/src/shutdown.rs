// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIGINT handling shared by the three role binaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
}

/// Installs a process-wide SIGINT handler and returns a flag that a main
/// loop can poll. Only the first call in a process actually registers the
/// handler; a second `Arc` is still handed back so callers don't need to
/// track whether they were first.
pub fn install_sigint_handler() -> Arc<AtomicBool> {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }
    let stop = Arc::new(AtomicBool::new(false));
    let mirrored = stop.clone();
    std::thread::spawn(move || {
        while !SHUTDOWN_REQUESTED.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(100));
        }
        mirrored.store(true, Ordering::Release);
    });
    stop
}
