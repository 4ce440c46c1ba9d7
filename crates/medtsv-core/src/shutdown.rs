//! Graceful shutdown: first SIGINT/SIGTERM sets a flag, second one exits

use std::sync::atomic::{AtomicBool, Ordering};

/// Exit status used when interrupted
pub const INTERRUPTED_EXIT_CODE: u8 = 130;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Check if shutdown was requested
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// Request shutdown. Returns whether it had already been requested.
pub fn request_shutdown() -> bool {
    SHUTDOWN.swap(true, Ordering::Relaxed)
}

/// Route SIGINT and SIGTERM to [`request_shutdown`].
///
/// The pipeline finishes the target in flight, closes the open chunk and
/// reports. A second signal terminates immediately.
pub fn install_signal_handlers() -> std::io::Result<()> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
        unsafe {
            signal_hook::low_level::register(signal, || {
                if request_shutdown() {
                    std::process::exit(i32::from(INTERRUPTED_EXIT_CODE));
                }
            })?;
        }
    }
    Ok(())
}
