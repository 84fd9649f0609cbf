//! This module contains the storage watcher: a polling subscription that
//! runs the one-shot analysis for every new transaction touching a watched
//! address and hands the per-address trace to a callback.
//!
//! The watcher is a thin loop over the public [`trace_storage_access`]
//! entry point. Analysis errors are reported through the error callback and
//! the loop keeps going; only an explicit unsubscribe stops it.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    assembler::StorageAccessTrace,
    constant::DEFAULT_POLL_INTERVAL_MS,
    error::Error,
    oracle::{ExecutionOracle, LayoutSource, TransactionRequest},
    tracer::{trace_storage_access, Config},
    value::Address,
};

/// The callback invoked with the watched address's trace for each
/// transaction that touched it.
pub type OnChange = Box<dyn Fn(&StorageAccessTrace) + Send + Sync>;

/// The callback invoked when an analysis or oracle error occurs. The loop
/// continues afterwards.
pub type OnError = Box<dyn Fn(Error) + Send + Sync>;

/// The handle returned by [`watch_storage`]. Dropping it does not stop the
/// watcher; call [`Unsubscribe::unsubscribe`].
#[derive(Debug)]
pub struct Unsubscribe {
    stopped: Arc<AtomicBool>,
    task:    JoinHandle<()>,
}

impl Unsubscribe {
    /// Stops the watcher. Idempotent: calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.task.abort();
            info!("storage watcher unsubscribed");
        }
    }

    /// Checks whether the watcher has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Subscribes to new blocks and runs the storage access analysis for every
/// transaction touching `address`, invoking `on_change` with the assembled
/// trace for that address.
///
/// Polling defaults to [`DEFAULT_POLL_INTERVAL_MS`] when no interval is
/// provided. Must be called from within a tokio runtime.
#[must_use]
pub fn watch_storage(
    oracle: Arc<dyn ExecutionOracle>,
    source: Arc<dyn LayoutSource>,
    config: Config,
    address: Address,
    on_change: OnChange,
    on_error: OnError,
    poll_interval: Option<Duration>,
) -> Unsubscribe {
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();
    let interval = poll_interval.unwrap_or(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut last_seen: Option<u64> = None;

        loop {
            ticker.tick().await;
            if flag.load(Ordering::SeqCst) {
                break;
            }

            let head = match oracle.latest_block().await {
                Ok(head) => head,
                Err(error) => {
                    on_error(error.into());
                    continue;
                }
            };

            let first = last_seen.map_or(head, |seen| seen + 1);
            for block in first..=head {
                if flag.load(Ordering::SeqCst) {
                    return;
                }
                debug!(block, %address, "scanning block for watched address");

                let hashes = match oracle.transactions_touching(address, block).await {
                    Ok(hashes) => hashes,
                    Err(error) => {
                        on_error(error.into());
                        continue;
                    }
                };

                for tx_hash in hashes {
                    let request = TransactionRequest::Replay { tx_hash };
                    let outcome = trace_storage_access(
                        oracle.clone(),
                        source.clone(),
                        config.clone(),
                        request,
                    )
                    .await;

                    match outcome {
                        Ok(result) => {
                            if let Some(trace) = result.get(&address) {
                                on_change(trace);
                            }
                        }
                        Err(error) => on_error(error),
                    }
                }
            }
            last_seen = Some(head);
        }
    });

    Unsubscribe { stopped, task }
}
