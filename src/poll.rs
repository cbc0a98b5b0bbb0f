//! Completion polling for long-running device operations.
//!
//! The controller has no push notifications; the only way to learn that a
//! recording or waveform run finished is to re-read its run flag. The poller
//! wraps that pattern: probe, sleep, repeat, until the probe reports done or
//! the time budget runs out. Waiting suspends the task, it never blocks a
//! thread.

use crate::error::{Nv200Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::trace;

/// Default pause between completion probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Repeatedly evaluates `probe` until it returns `true` or `budget` elapses.
///
/// The probe runs immediately on entry, so an operation that is already
/// finished returns without sleeping. When less than a full interval of
/// budget remains, the wait sleeps just the remainder and probes one last
/// time at the deadline, so the timeout only fires after the budget has
/// actually elapsed. A probe error aborts the wait and is returned as-is;
/// exhausting the budget fails with [`Nv200Error::Timeout`] carrying `what`
/// as the keyword.
pub async fn poll_until<F, Fut>(
    what: &str,
    mut probe: F,
    interval: Duration,
    budget: Duration,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + budget;
    loop {
        if probe().await? {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            trace!(what, budget_ms = budget.as_millis() as u64, "poll budget exhausted");
            return Err(Nv200Error::Timeout {
                keyword: what.to_string(),
                waited_ms: budget.as_millis() as u64,
            });
        }
        sleep(interval.min(deadline - now)).await;
    }
}
