/*
 * signal.rs
 *
 * Catch the "please die" signals while a command is running so they can be
 * passed on instead of killing cronwrap and orphaning the job.
 *
 * The child lives in its own process group, so a terminal Ctrl-C or a
 * SIGTERM from shutdown only reaches us. If we just died, the tree would
 * keep running with no timeout and the kernel would drop our flock, letting
 * the next cron tick start a second copy.
 *
 * The handler only stores the signal number in an atomic. The poll loop in
 * runner.rs picks it up on its next turn.
 *
 * Handlers are process-wide. Guards are refcounted: the first install saves
 * the old dispositions, the last drop puts them back.
 */

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};

/// Signals forwarded to the command.
pub const FORWARDED_SIGNALS: [i32; 3] = [libc::SIGTERM, libc::SIGINT, libc::SIGHUP];

/* last caught signal, 0 = none */
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

struct Installed {
    users: usize,
    previous: Vec<(i32, libc::sigaction)>,
}

static INSTALLED: Mutex<Installed> = Mutex::new(Installed {
    users: 0,
    previous: Vec::new(),
});

extern "C" fn record_signal(sig: i32) {
    /* atomic store is async-signal-safe */
    PENDING_SIGNAL.store(sig, Ordering::SeqCst);
}

/// Keeps the forwarding handlers installed while alive.
pub struct SignalGuard {
    _private: (),
}

impl SignalGuard {
    #[must_use]
    pub fn install() -> Self {
        let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
        if installed.users == 0 {
            PENDING_SIGNAL.store(0, Ordering::SeqCst);
            installed.previous = install_handlers();
        }
        installed.users += 1;
        Self { _private: () }
    }

    /// Take the pending signal, if one arrived since the last call.
    #[must_use]
    pub fn take_pending(&self) -> Option<i32> {
        match PENDING_SIGNAL.swap(0, Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
        installed.users = installed.users.saturating_sub(1);
        if installed.users == 0 {
            for (sig, old) in installed.previous.drain(..) {
                // SAFETY: `old` was filled in by a successful sigaction call.
                unsafe {
                    libc::sigaction(sig, &old, std::ptr::null_mut());
                }
            }
        }
    }
}

fn install_handlers() -> Vec<(i32, libc::sigaction)> {
    let mut previous = Vec::with_capacity(FORWARDED_SIGNALS.len());

    for sig in FORWARDED_SIGNALS {
        // SAFETY: sigaction structs are zeroed then initialized. record_signal
        // is an extern "C" fn that only touches an atomic.
        #[allow(clippy::multiple_unsafe_ops_per_block)]
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = record_signal as extern "C" fn(i32) as usize;
            sa.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&raw mut sa.sa_mask);

            let mut old: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(sig, &sa, &raw mut old) == 0 {
                previous.push((sig, old));
            }
        }
    }

    previous
}

/* signal number to a name for messages */
#[must_use]
pub fn signal_name(sig: i32) -> &'static str {
    match sig {
        libc::SIGTERM => "SIGTERM",
        libc::SIGINT => "SIGINT",
        libc::SIGHUP => "SIGHUP",
        libc::SIGKILL => "SIGKILL",
        _ => "signal",
    }
}

/*
 * Nothing here raises a real signal: unit tests share one process and the
 * runner tests hold guards of their own. Delivery is covered by the CLI
 * tests in tests/integration.rs.
 */
