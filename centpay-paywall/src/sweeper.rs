//! Periodic removal of expired invoices.

use std::time::Duration;

use chrono::Utc;
use centpay_core::store::InvoiceStore;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

/// Default sweep period.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to a background task sweeping an [`InvoiceStore`].
///
/// The task stops when [`shutdown`](InvoiceSweeper::shutdown) is awaited or the
/// handle is dropped.
#[derive(Debug)]
pub struct InvoiceSweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl InvoiceSweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn spawn(store: InvoiceStore, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_sweeper(store, interval, shutdown_rx));

        #[cfg(feature = "tracing")]
        tracing::debug!(interval_secs = interval.as_secs_f64(), "Invoice sweeper started");

        InvoiceSweeper {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for InvoiceSweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_sweeper(store: InvoiceStore, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let removed = store.sweep_expired(Utc::now());
                #[cfg(feature = "tracing")]
                if removed > 0 {
                    tracing::debug!(removed, remaining = store.len(), "Swept expired invoices");
                }
                #[cfg(not(feature = "tracing"))]
                let _ = removed;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Invoice sweeper stopped");
}
