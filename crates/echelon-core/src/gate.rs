use std::sync::{Condvar, Mutex, PoisonError};

use tokio::sync::watch;

/// One-shot gate: released at most once, then open forever.
///
/// Blocking waiters park on the condvar, async waiters on the watch channel.
/// Both observe the same release.
#[derive(Debug)]
pub(crate) struct CompletionGate {
    released: Mutex<bool>,
    cond: Condvar,
    notify: watch::Sender<bool>,
}

impl CompletionGate {
    pub(crate) fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            released: Mutex::new(false),
            cond: Condvar::new(),
            notify,
        }
    }

    /// Open the gate. Releasing an open gate does nothing.
    pub(crate) fn release(&self) {
        let mut released = self
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *released {
            return;
        }
        *released = true;
        drop(released);

        self.cond.notify_all();
        self.notify.send_replace(true);
    }

    /// Block the current thread until the gate opens.
    pub(crate) fn wait(&self) {
        let released = self
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _released = self
            .cond
            .wait_while(released, |released| !*released)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Wait asynchronously until the gate opens.
    pub(crate) async fn wait_async(&self) {
        let mut rx = self.notify.subscribe();
        // The sender lives as long as `self`, so this only fails if the gate is gone.
        let _ = rx.wait_for(|released| *released).await;
    }
}
