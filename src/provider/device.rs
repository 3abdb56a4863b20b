//! Device authorization grant polling (RFC 8628).

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

/// How much to stretch the interval on a `slow_down` response.
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// Classification of one token-endpoint poll.
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// User has not approved yet, keep polling.
    Pending,
    /// Provider asked us to back off; interval grows by 5 s.
    SlowDown,
    /// User declined the authorization.
    Denied,
    /// The device code itself expired.
    Expired,
    /// Tokens issued.
    Success(T),
}

/// Poll the token endpoint until the user approves, declines, the device
/// code expires, or the caller cancels. `attempt` runs one poll and
/// classifies the response; transport errors abort the loop.
pub async fn poll<T, F, Fut>(
    provider_id: &str,
    interval: Duration,
    expires_in: Duration,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome<T>>>,
{
    let deadline = Instant::now() + expires_in;
    let mut interval = interval;

    loop {
        if Instant::now() + interval >= deadline {
            return Err(Error::login_failed(provider_id, "device code expired"));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::LoginAborted),
            _ = tokio::time::sleep(interval) => {}
        }

        match attempt().await? {
            PollOutcome::Pending => {
                debug!(provider = provider_id, "authorization pending");
            }
            PollOutcome::SlowDown => {
                interval += SLOW_DOWN_INCREMENT;
                debug!(
                    provider = provider_id,
                    interval_secs = interval.as_secs(),
                    "provider asked to slow down"
                );
            }
            PollOutcome::Denied => {
                return Err(Error::login_failed(provider_id, "authorization denied"));
            }
            PollOutcome::Expired => {
                return Err(Error::login_failed(provider_id, "device code expired"));
            }
            PollOutcome::Success(value) => return Ok(value),
        }
    }
}
