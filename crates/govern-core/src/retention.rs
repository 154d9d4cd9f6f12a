//! Scheduled API usage retention

use govern_quota::QuotaService;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Run `reset_monthly_api_usage` every `period` until `shutdown` resolves.
///
/// The first run happens immediately. A failed run is logged and the loop
/// carries on. Returns how many runs succeeded.
pub async fn run_retention<S>(quota: &QuotaService, period: Duration, shutdown: S) -> u64
where
    S: Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut completed = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(completed, "retention loop stopped");
                return completed;
            }
            _ = ticker.tick() => {
                match quota.reset_monthly_api_usage().await {
                    Ok(_) => completed += 1,
                    Err(err) => error!(error = %err, "retention run failed, retrying next period"),
                }
            }
        }
    }
}
