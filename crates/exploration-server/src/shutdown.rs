//! Process-wide shutdown flag and the SIGINT/SIGPIPE dispositions.

use std::ffi::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use log::warn;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::SignalError;

/// Cooperative shutdown flag, set once and never cleared.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Flag the SIGINT handler sets. A signal handler cannot capture state, so
/// the installed flag is parked here.
static SIGINT_TARGET: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_sigint(_signal: c_int) {
    // Only an atomic store: async-signal-safe.
    if let Some(flag) = SIGINT_TARGET.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Park `shutdown` as the SIGINT target unless one is already set. True when
/// SIGINT ends up routed to `shutdown`.
fn route_sigint_to(shutdown: &ShutdownFlag) -> bool {
    let target = SIGINT_TARGET.get_or_init(|| Arc::clone(&shutdown.flag));
    Arc::ptr_eq(target, &shutdown.flag)
}

/// Route SIGINT to `shutdown` and ignore SIGPIPE.
///
/// The SIGINT handler is one-shot (`SA_RESETHAND`): a second interrupt gets
/// the default disposition and terminates the process. `SA_RESTART` is not
/// set, so a blocked accept or poll returns `EINTR` and the loops observe
/// the flag. Only the first installed flag is honoured; installing another
/// one logs a warning and leaves SIGINT routed to the first.
pub fn install_signal_handlers(shutdown: &ShutdownFlag) -> Result<(), SignalError> {
    if !route_sigint_to(shutdown) {
        warn!("SIGINT is already routed to another shutdown flag; keeping it");
    }

    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    // SAFETY: the handler only performs an atomic store.
    unsafe { signal::sigaction(Signal::SIGINT, &action) }.map_err(|source| SignalError {
        signal: "SIGINT",
        source,
    })?;

    // Broken pipes surface as write errors instead of killing the process.
    // SAFETY: SIG_IGN installs no user code.
    unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }.map_err(|source| {
        SignalError {
            signal: "SIGPIPE",
            source,
        }
    })?;

    Ok(())
}
