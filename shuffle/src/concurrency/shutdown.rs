use tokio::sync::watch;

/// Transmitter side of the client shutdown signal.
#[derive(Debug)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals shutdown to every current and future subscriber.
    pub fn shutdown(&self) {
        // Infallible send so shutdown works even when no receiver is alive.
        self.0.send_replace(true);
    }

    /// Creates a new receiver subscription.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the client shutdown signal.
///
/// Cloned into every component that waits, so a single [`ShutdownTx::shutdown`] call releases
/// all of them.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` once shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves when shutdown is signalled or the transmitter is dropped.
    pub async fn wait(&mut self) {
        // A dropped transmitter means the owning client is gone, which is a shutdown as well.
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }
}

/// Creates a new shutdown channel in the running state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
