//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a shared flag checked at batch boundaries, at the
//! start of each unit of work and around the upscale gate. Work already in
//! an external process is never interrupted; it finishes and its output is
//! kept.
//!
//! [`install_signal_handlers`] wires SIGINT/SIGTERM (and SIGHUP on unix) into
//! a token. The first signal only sets the flag; a second one falls through
//! to the default action and terminates the process.

use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Route termination signals into `token`.
pub fn install_signal_handlers(token: &CancelToken) -> std::io::Result<()> {
    let mut signals: Vec<i32> = TERM_SIGNALS.to_vec();
    #[cfg(unix)]
    signals.push(signal_hook::consts::SIGHUP);

    for sig in signals {
        // Order matters: the conditional default sees the flag before the
        // plain handler sets it, so only a repeated signal terminates.
        flag::register_conditional_default(sig, Arc::clone(&token.flag))?;
        flag::register(sig, Arc::clone(&token.flag))?;
    }
    Ok(())
}
