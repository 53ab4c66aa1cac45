use tokio::sync::broadcast;

/// A handle for telling the long-running protocol tasks on a machine to stop.
///
/// Cloned into every spawned task; any holder may initiate shutdown and every
/// holder can subscribe for the notification.
#[derive(Debug, Clone)]
pub struct Shutdown {
    notify: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Self { notify }
    }

    pub fn shut_down(&self) {
        // Fails only when no task is listening anymore, which is fine
        let _ = self.notify.send(());
    }

    pub fn receiver(&self) -> broadcast::Receiver<()> {
        self.notify.subscribe()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
