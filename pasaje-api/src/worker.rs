use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use pasaje_ticket::TicketLifecycle;

/// Cancels reservations whose hold lapsed, so their seats show as free.
pub fn start_hold_sweeper(lifecycle: Arc<TicketLifecycle>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Hold sweeper started, running every {:?}", every);

        loop {
            ticker.tick().await;
            match lifecycle.expire_stale().await {
                Ok(0) => {}
                Ok(n) => info!("Expired {} stale reservations", n),
                Err(e) => error!("Hold sweep failed: {}", e),
            }
        }
    })
}
