//! Usage accounting: two sinks updated on every successful completion.
//!
//! Inline on the account record (running totals, request count, last-used)
//! and in the daily per-account usage file. Both writes are best-effort from
//! the caller's perspective; a failed write is logged, never surfaced.

use std::sync::Arc;

use tracing::warn;

use crate::modules::storage::UsageStore;
use crate::proxy::token_manager::AccountPool;

pub struct UsageRecorder {
    pool: Arc<AccountPool>,
    store: UsageStore,
}

impl UsageRecorder {
    pub fn new(pool: Arc<AccountPool>, store: UsageStore) -> Self {
        Self { pool, store }
    }

    pub async fn record(&self, account_id: &str, input_tokens: i64, output_tokens: i64) {
        if let Err(e) = self
            .pool
            .record_usage(account_id, input_tokens, output_tokens)
            .await
        {
            warn!(account_id = %account_id, error = %e, "Failed to record account usage");
        }
        if let Err(e) = self.store.record(account_id, input_tokens, output_tokens) {
            warn!(account_id = %account_id, error = %e, "Failed to record daily usage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;
    use crate::modules::auth::oauth::OAuthClient;
    use crate::modules::storage::AccountStore;

    #[tokio::test]
    async fn record_updates_both_sinks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let account_store = AccountStore::new(dir.path().join("accounts"));
        account_store
            .save(&Account::new(
                "a_1".to_string(),
                "a@example.com".to_string(),
                "a".to_string(),
                "token".to_string(),
                "refresh".to_string(),
                7200,
            ))
            .expect("save");

        let pool = Arc::new(AccountPool::new(account_store, OAuthClient::new(8045)));
        let usage_store = UsageStore::new(dir.path().join("usage"));
        let recorder = UsageRecorder::new(pool.clone(), usage_store.clone());

        recorder.record("a_1", 100, 25).await;

        let account = pool.store().load("a_1").expect("load");
        assert_eq!(account.usage.request_count, 1);
        assert_eq!(account.usage.total_tokens, 125);

        let daily = usage_store.history(1).expect("history");
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].total_tokens, 125);
        assert_eq!(daily[0].request_count, 1);
    }

    #[tokio::test]
    async fn missing_account_does_not_block_daily_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = Arc::new(AccountPool::new(
            AccountStore::new(dir.path().join("accounts")),
            OAuthClient::new(8045),
        ));
        let usage_store = UsageStore::new(dir.path().join("usage"));
        let recorder = UsageRecorder::new(pool, usage_store.clone());

        recorder.record("ghost", 10, 10).await;

        let daily = usage_store.history(1).expect("history");
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].account_id, "ghost");
    }
}
