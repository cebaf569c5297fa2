use anyhow::{Result, bail};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Upper bound on upstream attempts (initial call plus retries).
pub const MAX_ATTEMPTS: usize = 3;

const BASE: Duration = Duration::from_secs(1);
const DEFAULT_CAP: Duration = Duration::from_secs(10);

/// How a failed upstream call should be handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    /// Transport error or retryable status; back off and try again.
    Transient,
    /// Session expired; refresh the token once, then try again.
    AuthExpired,
    /// Everything else is surfaced verbatim.
    Permanent,
}

/// Classify an HTTP status for the retry loop.
pub fn classify_status(status: u16) -> Transience {
    match status {
        401 => Transience::AuthExpired,
        429 | 500 | 502 | 503 | 504 => Transience::Transient,
        _ => Transience::Permanent,
    }
}

/// Sleep before retry `attempt`, waking immediately if `cancel` fires.
pub async fn backoff(cancel: &CancellationToken, attempt: usize) -> Result<()> {
    let delay = backoff_full_jitter(BASE, DEFAULT_CAP, attempt);
    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
    tokio::select! {
        _ = cancel.cancelled() => bail!("context cancelled"),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Pick a random delay in `[0, window]`, where the window doubles per
/// attempt up to `cap`. Randomising over the whole window keeps a burst
/// of failing callers from retrying in lockstep.
pub fn backoff_full_jitter(base: Duration, cap: Duration, attempt: usize) -> Duration {
    let window_ms = retry_window_ms(base, cap, attempt);
    Duration::from_millis(rand::random_range(0..=window_ms))
}

/// Millisecond ceiling for the given attempt: `base` doubled `attempt`
/// times, clamped to `[1, cap]`.
fn retry_window_ms(base: Duration, cap: Duration, attempt: usize) -> u64 {
    let cap_ms = (cap.as_millis() as u64).max(1);
    let mut window_ms = (base.as_millis() as u64).clamp(1, cap_ms);
    for _ in 0..attempt {
        if window_ms == cap_ms {
            break;
        }
        window_ms = window_ms.saturating_add(window_ms).min(cap_ms);
    }
    window_ms
}
