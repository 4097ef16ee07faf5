//! Interrupt handling for the server.
//!
//! The handler only flips an atomic flag. It is installed without SA_RESTART
//! so a blocking `poll` wakes with `EINTR`, giving the event loop a chance to
//! observe the flag and shut down cleanly.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT handler. Call once at startup, before the event loop.
pub fn install_sigint_handler() -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_sigint as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0; // no SA_RESTART: poll must return EINTR
        if libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Whether an interrupt has been requested.
pub fn requested() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_flips_on_signal() {
        install_sigint_handler().unwrap();
        assert!(!requested());

        unsafe {
            libc::raise(libc::SIGINT);
        }
        assert!(requested());
    }
}
