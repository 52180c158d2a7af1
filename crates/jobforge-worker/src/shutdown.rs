//! Shutdown signal shared by every background loop.

use tokio::sync::watch;

/// Resolve once shutdown was requested or the engine that owns the sender
/// went away.
pub(crate) async fn requested(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}
