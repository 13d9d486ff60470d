//! Generic polling loop trait and runner.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Trait for implementing a polling-based processor.
#[async_trait]
pub trait PollingProcessor {
    /// The state type prepared for each iteration.
    type State: Send;
    /// The error type for this processor.
    type Error: std::error::Error + Send;

    /// Prepare state for a processing iteration.
    ///
    /// Returns `None` if there is no work to do this cycle.
    async fn prepare(&mut self) -> Result<Option<Self::State>, Self::Error>;

    /// Process the prepared state.
    async fn process(&mut self, state: Self::State) -> Result<(), Self::Error>;
}

/// Run a polling loop with the given processor.
///
/// 1. Call `prepare()` to set up state (raced against the shutdown token)
/// 2. Call `process()` if there is work to do; a started iteration runs to
///    completion, cancellation is only observed between cycles
/// 3. Wait for `poll_interval` or shutdown
/// 4. Repeat until shutdown
///
/// An error from either phase propagates out and ends the loop.
pub async fn run_polling_loop<P: PollingProcessor>(
    processor: &mut P,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), P::Error> {
    loop {
        let shutdown_clone = shutdown.clone();
        let state = tokio::select! {
            biased;

            _ = shutdown_clone.cancelled() => {
                info!("Shutdown requested, stopping polling loop");
                return Ok(());
            }

            result = processor.prepare() => result?,
        };

        match state {
            Some(state) => {
                processor.process(state).await?;
                info!(
                    "Iteration complete, waiting {}s before next poll",
                    poll_interval.as_secs()
                );
            }
            None => {
                info!(
                    "No new items, waiting {}s before next poll",
                    poll_interval.as_secs()
                );
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested during poll wait");
                break;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    Ok(())
}
