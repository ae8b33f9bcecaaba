//! Outer driver: one pass, or passes repeated on a fixed interval.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info};

use crate::error::Result;
use crate::reconciler::Reconciler;

/// Counts of passes run by [`ReconcileLoop::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub passes: u64,
    pub failures: u64,
}

/// Re-runs a reconciler until shut down. Failed passes never end the loop.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileLoop {
    interval: Duration,
}

impl ReconcileLoop {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Single-shot mode: run one pass and hand its result to the caller.
    pub async fn run_once<R: Reconciler>(reconciler: &R, spec: &R::Spec) -> Result<R::Status> {
        reconciler.reconcile(spec).await
    }

    /// Continuous mode. A pass in flight when `shutdown` resolves runs to
    /// completion; the loop then stops before sleeping again.
    pub async fn run<R, F>(&self, reconciler: &R, spec: &R::Spec, shutdown: F) -> LoopSummary
    where
        R: Reconciler,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut summary = LoopSummary::default();

        loop {
            summary.passes += 1;
            match reconciler.reconcile(spec).await {
                Ok(_) => info!("Pass {} succeeded", summary.passes),
                Err(e) => {
                    summary.failures += 1;
                    error!(
                        "Pass {} failed: {}. Retrying in {:?}",
                        summary.passes, e, self.interval
                    );
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!(
                        "Reconcile loop stopping after {} passes ({} failed)",
                        summary.passes, summary.failures
                    );
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        summary
    }
}
