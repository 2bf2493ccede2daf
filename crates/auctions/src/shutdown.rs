use tokio::sync::watch;

/// Cloneable handle that long running loops and waits observe to stop
/// early.
#[derive(Clone, Debug)]
pub struct Shutdown(watch::Receiver<bool>);

/// Triggers every [`Shutdown`] handle created from the same channel.
#[derive(Debug)]
pub struct ShutdownSignal(watch::Sender<bool>);

impl Shutdown {
    /// Creates a handle which fires on SIGINT or SIGTERM.
    pub fn on_signal() -> Self {
        let (signal, shutdown) = Self::manual();
        tokio::spawn(Self::wait_for_signal(signal));
        shutdown
    }

    /// Creates a handle that only fires when the returned signal is
    /// triggered.
    pub fn manual() -> (ShutdownSignal, Self) {
        let (sender, receiver) = watch::channel(false);
        (ShutdownSignal(sender), Self(receiver))
    }

    /// A handle that never fires.
    pub fn never() -> Self {
        Self::manual().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown was requested. Pends forever if the signal
    /// side was dropped without triggering.
    pub async fn triggered(&mut self) {
        if self.0.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    async fn wait_for_signal(signal: ShutdownSignal) {
        #[cfg(unix)]
        {
            use tokio::signal::{self, unix};
            let mut sigterm = match unix::signal(unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    tracing::error!(?err, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = signal::ctrl_c() => tracing::info!("received SIGINT"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(?err, "failed to install CTRL+C handler");
                return;
            }
            tracing::info!("received SIGINT");
        }

        signal.trigger();
    }
}

impl ShutdownSignal {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    #[tokio::test(start_paused = true)]
    async fn fires_for_every_clone() {
        let (signal, shutdown) = Shutdown::manual();
        let mut first = shutdown.clone();
        let mut second = shutdown;
        assert!(!first.is_triggered());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            signal.trigger();
        });
        first.triggered().await;
        second.triggered().await;
        assert!(second.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn never_fires() {
        let mut shutdown = Shutdown::never();
        let fired = tokio::time::timeout(Duration::from_secs(3600), shutdown.triggered()).await;
        assert!(fired.is_err());
    }
}
