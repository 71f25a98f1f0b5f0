//! Process-exit closing of stores that are still open.
//!
//! Stores opened without `will_be_closed_during_shutdown` register a weak
//! handle here. The first registration installs an `atexit` hook that
//! closes whatever is still registered; [`close_all_open`] does the same
//! on demand.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, Once, Weak};

use tracing::{error, info};

use crate::error::DumpError;

/// Something the exit hook can close.
pub(crate) trait Closeable: Send + Sync {
    fn close_for_shutdown(&self) -> Result<(), DumpError>;

    fn describe(&self) -> String;
}

static OPEN: Mutex<Vec<(u64, Weak<dyn Closeable>)>> = Mutex::new(Vec::new());
static HOOK: Once = Once::new();

pub(crate) fn register(id: u64, handle: Weak<dyn Closeable>) {
    install_hook();
    if let Ok(mut open) = OPEN.lock() {
        open.push((id, handle));
    }
}

pub(crate) fn unregister(id: u64) {
    if let Ok(mut open) = OPEN.lock() {
        open.retain(|(other, _)| *other != id);
    }
}

/// Closes every registered store that is still open.
///
/// Errors are logged, not returned. Returns the number of stores closed.
pub fn close_all_open() -> usize {
    // Upgrade under the registry lock, close outside it: closing
    // unregisters.
    let live: Vec<_> = match OPEN.lock() {
        Ok(mut open) => open.drain(..).filter_map(|(_, w)| w.upgrade()).collect(),
        Err(_) => return 0,
    };

    let mut closed = 0;
    for store in live {
        // One store failing must not keep the rest open.
        match panic::catch_unwind(AssertUnwindSafe(|| store.close_for_shutdown())) {
            Ok(Ok(())) => closed += 1,
            Ok(Err(e)) => error!(store = %store.describe(), error = %e, "failed to close at shutdown"),
            Err(_) => error!(store = %store.describe(), "panic while closing at shutdown"),
        }
    }
    if closed > 0 {
        info!(closed, "stores closed at shutdown");
    }
    closed
}

extern "C" fn on_exit() {
    let _ = panic::catch_unwind(close_all_open);
}

fn install_hook() {
    HOOK.call_once(|| {
        // SAFETY: `on_exit` is a plain `extern "C"` function that never
        // unwinds across the FFI boundary.
        let rc = unsafe { libc::atexit(on_exit) };
        if rc != 0 {
            error!("failed to install exit hook");
        }
    });
}
