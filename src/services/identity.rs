// Identity service: runs one reconciliation per call inside a write transaction,
// rerunning the whole transaction when it loses a race.

use std::thread;
use std::time::Duration;

use crate::db::ContactDb;
use crate::error::IdentityError;
use crate::projector::ConsolidatedIdentity;
use crate::reconcile::reconcile;
use crate::types::Config;

/// How many times a reconciliation may be attempted before the last error is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_tx_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Resolve one observation. Each attempt starts again from the direct-match
/// query, so a retry sees whatever the competing transaction committed.
pub fn identify(
    db: &ContactDb,
    email: Option<&str>,
    phone: Option<&str>,
    policy: RetryPolicy,
) -> Result<ConsolidatedIdentity, IdentityError> {
    let mut attempt = 1;
    loop {
        match db.with_transaction(|tx| reconcile(tx, email, phone)) {
            Ok(identity) => return Ok(identity),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                log::warn!(
                    "Reconcile attempt {}/{} failed, retrying: {}",
                    attempt,
                    policy.max_attempts,
                    e
                );
                thread::sleep(policy.backoff * attempt);
                attempt += 1;
            }
            Err(e) => {
                if let IdentityError::Consistency(_) = e {
                    log::error!("Identity graph invariant violated: {}", e);
                }
                return Err(e);
            }
        }
    }
}
