//! Long-lived change subscription.
//!
//! # Data Flow
//! ```text
//! KvStore::watch(namespace, after)
//!     → for each mutation, in store order:
//!         parse → skip on error / unknown key
//!         send Change on the consumer channel (raced against cancellation)
//! ```
//!
//! # Design Decisions
//! - Cancellation is checked at both blocking points: the watch receive
//!   and the channel send
//! - The loop never reconnects by itself; resuming is the caller's job,
//!   by subscribing again after the last processed revision

use tokio::sync::mpsc;

use crate::engine::parser::Change;
use crate::engine::Engine;
use crate::error::Error;
use crate::lifecycle::ShutdownSignal;
use crate::store::Revision;

impl Engine {
    /// Stream changes with revision > `after` into `tx` until cancelled.
    ///
    /// Returns `Ok(())` when cancelled, when the store ends the watch
    /// gracefully or when the consumer goes away; store failures are
    /// returned as errors.
    pub async fn subscribe(
        &self,
        tx: mpsc::Sender<Change>,
        after: Revision,
        mut cancel: ShutdownSignal,
    ) -> Result<(), Error> {
        let prefix = self.keys.namespace();
        let mut stream = self.store.watch(&prefix, after).await?;
        tracing::info!(prefix = %prefix, after, "Subscription started");

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.recv() => {
                    tracing::info!("Subscription cancelled");
                    return Ok(());
                }
                item = stream.next() => item,
            };

            let raw = match item {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Watch failed");
                    return Err(e.into());
                }
                None => {
                    tracing::info!("Watch closed by store");
                    return Ok(());
                }
            };

            let event = match self.parse(&raw).await {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        key = %raw.key,
                        revision = raw.revision,
                        error = %e,
                        "Skipping change that could not be parsed"
                    );
                    continue;
                }
            };
            tracing::debug!(kind = event.kind(), revision = raw.revision, "Change observed");

            let change = Change {
                revision: raw.revision,
                event,
            };
            tokio::select! {
                biased;
                _ = cancel.recv() => {
                    tracing::info!("Subscription cancelled while delivering");
                    return Ok(());
                }
                sent = tx.send(change) => {
                    if sent.is_err() {
                        tracing::info!("Change consumer closed");
                        return Ok(());
                    }
                }
            }
        }
    }
}
