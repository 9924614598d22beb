//! Stop signals shared by the host and its serve loops.
//!
//! The host keeps one [`ShutdownSignal`] per transport for graceful stop.
//! Callers may hand it another through
//! [`TransportHost::with_cancellation`](crate::TransportHost::with_cancellation)
//! to abort `start` while services are still registering.
//!
//! ```rust,ignore
//! use twinport_server::ShutdownSignal;
//!
//! let cancel = ShutdownSignal::with_os_signals();
//! let host = TransportHost::new(config).with_cancellation(cancel);
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// A latch that flips once and can be awaited by any number of tasks.
///
/// ```rust
/// use twinport_server::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let observer = shutdown.clone();
///
/// shutdown.trigger();
/// assert!(observer.is_shutdown());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    fired: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            fired: Arc::new(fired),
        }
    }

    /// Flips the latch and wakes every waiter. Later calls do nothing.
    pub fn trigger(&self) {
        self.fired.send_if_modified(|fired| !std::mem::replace(fired, true));
    }

    /// Whether [`trigger`](Self::trigger) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.fired.borrow()
    }

    /// Resolves once the signal fires, at once if it already has.
    ///
    /// The subscription is taken when this is called, not when the future is
    /// first polled.
    pub fn recv(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.fired.subscribe();
        async move {
            // The sender lives as long as any clone of the signal; a closed
            // channel can only be observed after every owner is gone.
            let _ = rx.wait_for(|fired| *fired).await;
        }
    }

    /// A signal fired by SIGTERM or SIGINT, or Ctrl+C off Unix.
    ///
    /// Must be called inside a Tokio runtime. When the handlers cannot be
    /// installed the failure is logged and the OS never fires the signal.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            match os_stop_request().await {
                Ok(name) => {
                    tracing::info!(signal = name, "stop requested by the OS");
                    trigger.trigger();
                }
                Err(e) => tracing::error!(error = %e, "cannot install OS signal handlers"),
            }
        });

        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn os_stop_request() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    Ok(tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn os_stop_request() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_trigger_is_idempotent_and_shared() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_shutdown());

        signal.trigger();
        signal.trigger();
        assert!(clone.is_shutdown());
    }

    #[test]
    fn test_waiter_pending_until_triggered() {
        let signal = ShutdownSignal::new();
        let mut waiter = task::spawn(signal.recv());

        assert_pending!(waiter.poll());
        signal.trigger();
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
    }

    #[test]
    fn test_waiter_created_after_trigger_is_ready() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let mut waiter = task::spawn(signal.recv());
        assert_ready!(waiter.poll());
    }

    #[test]
    fn test_waiter_outlives_signal_handle() {
        let signal = ShutdownSignal::new();
        let trigger = signal.clone();
        let mut waiter = task::spawn(signal.recv());
        drop(signal);

        assert_pending!(waiter.poll());
        trigger.trigger();
        assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_trigger_from_another_task() {
        let signal = ShutdownSignal::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .expect("recv should complete");
    }
}
