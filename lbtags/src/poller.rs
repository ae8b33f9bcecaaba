//! Operation poller - waits for asynchronous provider operations to finish.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::PollSettings;
use crate::error::{Error, Result};
use crate::model::Operation;
use crate::provider::ResourceProvider;

/// Blocks the calling pass until an operation is terminal or times out.
#[derive(Debug, Clone, Copy)]
pub struct OperationPoller {
    interval: Duration,
    timeout: Duration,
}

impl OperationPoller {
    pub fn new(settings: PollSettings) -> Self {
        Self {
            interval: settings.interval,
            timeout: settings.timeout,
        }
    }

    /// Wait for `operation` to reach `Done`.
    ///
    /// An operation that is already done returns without polling. Poll
    /// failures are logged and retried until the timeout.
    pub async fn wait<P>(&self, provider: &P, operation: Operation) -> Result<()>
    where
        P: ResourceProvider + ?Sized,
    {
        if operation.is_done() {
            return check(&operation);
        }
        if operation.id.is_empty() {
            return Err(Error::Misuse(
                "pending operation without an id cannot be polled".into(),
            ));
        }

        let id = operation.id.clone();
        let waited = tokio::time::timeout(self.timeout, async {
            let mut failed_polls = 0u32;
            loop {
                tokio::time::sleep(self.interval).await;
                match provider.poll_operation(&operation).await {
                    Ok(polled) if polled.is_done() => return polled,
                    Ok(polled) => debug!("Operation {} still {:?}", id, polled.status),
                    Err(e) => {
                        failed_polls += 1;
                        warn!("Polling operation {} failed ({} so far): {}", id, failed_polls, e);
                    }
                }
            }
        })
        .await;

        match waited {
            Ok(done) => check(&done),
            Err(_) => Err(Error::Timeout {
                operation: id,
                timeout: self.timeout,
            }),
        }
    }
}

impl Default for OperationPoller {
    fn default() -> Self {
        Self::new(PollSettings::default())
    }
}

fn check(operation: &Operation) -> Result<()> {
    match operation.error_message() {
        Some(message) => Err(Error::OperationFailed {
            operation: operation.id.clone(),
            message: message.to_string(),
            status: operation.http_status,
        }),
        None => Ok(()),
    }
}
