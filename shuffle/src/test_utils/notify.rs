use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Longest time a test waits for mock activity before failing.
///
/// Mocks answer immediately, so reaching this means the awaited state never happens.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Wakes tests whenever a mock records new activity.
#[derive(Debug, Clone, Default)]
pub struct ActivitySignal {
    notify: Arc<Notify>,
}

impl ActivitySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes every test currently waiting in [`ActivitySignal::wait_for`].
    pub fn signal(&self) {
        self.notify.notify_waiters();
    }

    /// Waits until `condition` holds, re-checking it after each signal.
    ///
    /// # Panics
    ///
    /// Panics if the condition does not hold within [`DEFAULT_NOTIFY_TIMEOUT`].
    pub async fn wait_for<F>(&self, what: &str, condition: F)
    where
        F: Fn() -> bool,
    {
        let waiting = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                // Registered before checking so a signal between the check and the await is kept.
                notified.as_mut().enable();

                if condition() {
                    return;
                }

                notified.await;
            }
        };

        if tokio::time::timeout(DEFAULT_NOTIFY_TIMEOUT, waiting)
            .await
            .is_err()
        {
            panic!("timed out after {DEFAULT_NOTIFY_TIMEOUT:?} waiting for {what}");
        }
    }
}
