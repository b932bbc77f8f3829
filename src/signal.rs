//! Unix signal handling (SIGINT, SIGHUP, SIGTERM).
//!
//! The handler only sets the session's interrupt flag.  Children in our
//! process group receive a terminal SIGINT too; the executor notices the flag
//! between polls, reaps what is still running and cleans up its outputs.

use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

static FLAG: AtomicPtr<AtomicBool> = AtomicPtr::new(std::ptr::null_mut());

extern "C" fn handler(_sig: libc::c_int) {
    let flag = FLAG.load(Ordering::SeqCst);
    if !flag.is_null() {
        // Safety: registered flags are never freed.
        unsafe { (*flag).store(true, Ordering::SeqCst) };
    }
}

/// Route termination signals to `flag`.
///
/// The flag stays allocated for the life of the process, including when a
/// later call replaces it, since a handler may be reading the old pointer.
pub fn register(flag: Arc<AtomicBool>) {
    let ptr = Arc::into_raw(flag) as *mut AtomicBool;
    FLAG.store(ptr, Ordering::SeqCst);
    for sig in [libc::SIGINT, libc::SIGHUP, libc::SIGTERM] {
        // Safety: registering a signal handler is libc unsafe code.
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = handler as libc::sighandler_t;
            libc::sigaction(sig, &sa, std::ptr::null_mut());
        }
    }
}
