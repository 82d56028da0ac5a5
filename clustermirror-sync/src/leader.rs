//! Leadership-gated manager runs.

use crate::manager::SynchroManager;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs a [`SynchroManager`] only while `leading` reads `true`.
///
/// Leadership is an external signal: whatever holds the lease flips the
/// sender. Losing leadership cancels the current term and waits for every
/// worker to stop before a new term may start.
pub struct LeaderGate {
    leading: watch::Receiver<bool>,
}

impl LeaderGate {
    pub fn new(leading: watch::Receiver<bool>) -> Self {
        Self { leading }
    }

    /// Returns once `shutdown` fires and the current term, if any, has ended.
    /// A dropped sender counts as lost leadership for good.
    pub async fn run(mut self, manager: SynchroManager, concurrency: usize, shutdown: CancellationToken) {
        loop {
            let acquired = tokio::select! {
                _ = shutdown.cancelled() => return,
                acquired = self.leading.wait_for(|leading| *leading) => acquired.is_ok(),
            };
            if !acquired {
                shutdown.cancelled().await;
                return;
            }

            info!("Leadership acquired, starting synchronization");
            let term = shutdown.child_token();
            let run = manager.run(concurrency, term.clone());
            tokio::pin!(run);

            let sender_gone = tokio::select! {
                _ = &mut run => {
                    // Only `shutdown` ends a term on its own.
                    return;
                }
                lost = self.leading.wait_for(|leading| !*leading) => lost.is_err(),
            };
            term.cancel();
            run.await;
            info!("Leadership term ended, synchronization stopped");

            if sender_gone {
                shutdown.cancelled().await;
                return;
            }
        }
    }
}
