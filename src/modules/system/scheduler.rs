//! Background token refresher.
//!
//! One long-lived task driven by a 30-minute ticker; the first tick fires
//! immediately on startup. Stoppable through a watch channel so shutdown can
//! wait for the in-flight tick to finish.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{info, warn};

use crate::proxy::token_manager::AccountPool;

const REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

pub struct RefreshScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub fn start_refresh_scheduler(pool: Arc<AccountPool>) -> RefreshScheduler {
    let (shutdown, mut stop_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!("Background token refresh scheduler started (every 30m)");
        // The first tick of a tokio interval completes immediately, which
        // gives the required refresh-on-startup pass.
        let mut interval = time::interval(REFRESH_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let summary = pool.refresh_all().await;
                    info!(
                        success = summary.success,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        "Batch token refresh completed"
                    );
                }
                _ = stop_rx.changed() => {
                    info!("Background token refresh scheduler stopped");
                    break;
                }
            }
        }
    });

    RefreshScheduler { shutdown, handle }
}

impl RefreshScheduler {
    /// Signal the task and wait for it to wind down.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Refresh scheduler task did not stop cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;
    use crate::modules::auth::oauth::OAuthClient;
    use crate::modules::storage::AccountStore;

    fn fresh_account(id: &str) -> Account {
        // Two-hour lifetime issued now: outside the refresh window, so the
        // scheduler tick skips it without touching the network.
        Account::new(
            id.to_string(),
            format!("{}@example.com", id),
            id.to_string(),
            "ya29.access".to_string(),
            "1//refresh".to_string(),
            7200,
        )
    }

    #[tokio::test]
    async fn scheduler_runs_startup_tick_and_stops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = AccountStore::new(dir.path());
        store.save(&fresh_account("a_1")).expect("save");

        let pool = Arc::new(AccountPool::new(store, OAuthClient::new(8045)));
        let scheduler = start_refresh_scheduler(pool);

        // Give the immediate first tick room to run, then stop; stop() hangs
        // forever if the select loop ignores the shutdown signal.
        time::sleep(Duration::from_millis(50)).await;
        time::timeout(Duration::from_secs(5), scheduler.stop())
            .await
            .expect("scheduler must stop promptly");
    }
}
