//! Bounded retries for outbound value updates
//!
//! Pushing a value to subscribed centrals can be refused while the outbound
//! queue is full. The controller tries once, then retries each time the
//! hardware reports the queue is ready again, up to a fixed bound.

use tracing::{debug, warn};

use crate::bus::EventReceiver;
use crate::error::{BleError, Result};

/// Number of retries after the first refused update
pub const UPDATE_VALUE_RETRIES: usize = 4;

/// How a retried send ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted on the given attempt (1-based)
    Accepted { attempt: usize },
    /// Every attempt was refused
    Exhausted,
}

/// Call `send` until it accepts, waiting for a ready event between attempts.
///
/// `events` must be subscribed before the first attempt so no readiness
/// signal is lost; each signal triggers exactly one retry.
pub(crate) async fn send_until_accepted<E, S, R>(
    mut events: EventReceiver<E>,
    mut send: S,
    is_ready: R,
    retries: usize,
) -> Result<SendOutcome>
where
    S: FnMut() -> bool,
    R: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        if send() {
            debug!(attempt, "Update accepted");
            return Ok(SendOutcome::Accepted { attempt });
        }
        if attempt > retries {
            warn!(attempts = attempt, "Update refused, giving up");
            return Ok(SendOutcome::Exhausted);
        }

        debug!(attempt, "Update refused, waiting for ready signal");
        loop {
            match events.recv().await {
                Some(event) if is_ready(&event) => break,
                Some(_) => continue,
                None => return Err(BleError::EventBusClosed),
            }
        }
        attempt += 1;
    }
}
