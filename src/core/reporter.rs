//! Periodic progress notifier (spec §4.4: "a side channel, not a
//! correctness feature; it must terminate when the wait completes").

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Spawns a background thread that logs `message` once every `interval`
/// until [`ProgressNotifier::stop`] is called (or it is dropped, which has
/// the same effect).
pub struct ProgressNotifier {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressNotifier {
    pub fn start(message: impl Into<String>, interval: Duration) -> Self {
        let message = message.into();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        log::debug!("{message}");
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressNotifier {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
