//! Per-attempt deadlines.

use std::future::Future;

use tracing::warn;

use super::TimeoutPolicy;
use crate::telemetry;
use crate::{AtelierError, Result};

/// Run `fut` under the deadline resolved for `provider` on `endpoint`
/// (endpoint override, else provider override, else default).
///
/// Expiry drops the future and yields [`AtelierError::Timeout`], which is
/// distinct from any error the operation itself produces.
pub async fn with_timeout<Fut, T>(
    policy: &TimeoutPolicy,
    provider: &str,
    endpoint: &str,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let Some(after) = policy.resolve(provider, endpoint) else {
        return fut.await;
    };
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            metrics::counter!(telemetry::TIMEOUTS_TOTAL, "provider" => provider.to_owned())
                .increment(1);
            warn!(provider, endpoint, timeout_s = after.as_secs_f64(), "provider attempt timed out");
            Err(AtelierError::Timeout {
                provider: provider.to_string(),
                endpoint: endpoint.to_string(),
                after,
            })
        }
    }
}
