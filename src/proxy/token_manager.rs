//! Account pool: rotation, health filtering and per-account bookkeeping.
//!
//! The pool is the only writer of account files at runtime. Every
//! read-modify-write goes through a per-account async mutex held just for the
//! load-mutate-save window, never across network I/O; two tasks refreshing
//! the same account concurrently therefore converge on a last-write-wins
//! record without corrupting the file.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::Account;
use crate::modules::auth::oauth::{OAuthClient, RefreshError};
use crate::modules::storage::AccountStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The store holds no accounts at all.
    NoAccounts,
    /// Accounts exist but all are disabled, cooling down or failed refresh.
    NoUsableAccount,
}

impl std::fmt::Display for AcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquireError::NoAccounts => write!(f, "no accounts available"),
            AcquireError::NoUsableAccount => write!(
                f,
                "no valid accounts available (all disabled, in cooldown, or failed refresh)"
            ),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RefreshSummary {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct AccountPool {
    store: AccountStore,
    oauth: OAuthClient,
    cursor: AtomicUsize,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AccountPool {
    pub fn new(store: AccountStore, oauth: OAuthClient) -> Self {
        Self {
            store,
            oauth,
            cursor: AtomicUsize::new(0),
            write_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    pub fn account_count(&self) -> usize {
        self.store.list().map(|ids| ids.len()).unwrap_or(0)
    }

    /// Select one usable account, walking at most one full rotation from the
    /// cursor. The cursor advances once per examined candidate, so a healthy
    /// pool rotates strictly while skipped accounts don't stall the order.
    pub async fn acquire(&self) -> Result<Account, AcquireError> {
        let ids = match self.store.list() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list accounts");
                return Err(AcquireError::NoAccounts);
            }
        };
        if ids.is_empty() {
            return Err(AcquireError::NoAccounts);
        }

        for _ in 0..ids.len() {
            let slot = self.cursor.fetch_add(1, Ordering::SeqCst);
            let account_id = &ids[(slot + 1) % ids.len()];

            let account = match self.store.load(account_id) {
                Ok(account) => account,
                Err(e) => {
                    warn!(account_id = %account_id, error = %e, "Failed to load account during rotation");
                    continue;
                }
            };

            if !account.enable {
                continue;
            }
            if account.is_in_cooldown() {
                continue;
            }

            if account.needs_refresh() {
                match self.refresh_account(&account).await {
                    Ok(refreshed) => return Ok(refreshed),
                    Err(e) => {
                        warn!(account_id = %account_id, error = %e, "Failed to refresh token during rotation");
                        continue;
                    }
                }
            }

            debug!(
                account_id = %account.account_id,
                email = %account.email,
                "Selected account for request"
            );
            return Ok(account);
        }

        Err(AcquireError::NoUsableAccount)
    }

    /// Refresh the access token and persist the outcome. The token call runs
    /// without any lock; only the record update is serialized. Failures are
    /// recorded through the state machine before being surfaced.
    pub async fn refresh_account(&self, account: &Account) -> AppResult<Account> {
        let account_id = account.account_id.clone();
        info!(account_id = %account_id, "Refreshing token");

        match self.oauth.refresh(&account.refresh_token).await {
            Ok(token) => {
                let models = self.oauth.fetch_models(&token.access_token).await;
                let updated = self
                    .with_account(&account_id, |acc| {
                        acc.access_token = token.access_token.clone();
                        if let Some(new_refresh) = &token.refresh_token {
                            acc.refresh_token = new_refresh.clone();
                        }
                        acc.expires_in = token.expires_in;
                        acc.issued_at = chrono::Utc::now().timestamp_millis();
                        if !models.is_empty() {
                            acc.models = models.clone();
                        }
                        acc.record_success();
                    })
                    .await?;
                info!(
                    account_id = %account_id,
                    expires_in = updated.expires_in,
                    "Token refreshed successfully"
                );
                Ok(updated)
            }
            Err(RefreshError::RateLimited) => {
                self.record_rate_limit(&account_id).await?;
                Err(AppError::OAuth("token refresh rate limited".to_string()))
            }
            Err(RefreshError::PermissionDenied) => {
                self.record_permission_denied(&account_id).await?;
                Err(AppError::OAuth("token refresh permission denied".to_string()))
            }
            Err(RefreshError::Other(message)) => {
                self.record_failure(&account_id, &message).await?;
                Err(AppError::OAuth(message))
            }
        }
    }

    /// One pass over the whole store: refresh every enabled account that is
    /// out of cooldown and inside the expiry window.
    pub async fn refresh_all(&self) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        let ids = match self.store.list() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list accounts for refresh");
                return summary;
            }
        };

        for account_id in ids {
            let account = match self.store.load(&account_id) {
                Ok(account) => account,
                Err(e) => {
                    warn!(account_id = %account_id, error = %e, "Failed to load account for refresh");
                    continue;
                }
            };

            if !account.enable {
                summary.skipped += 1;
                continue;
            }
            if account.is_in_cooldown() {
                info!(account_id = %account_id, "Skipping account in cooldown");
                summary.skipped += 1;
                continue;
            }
            if !account.needs_refresh() {
                summary.skipped += 1;
                continue;
            }

            match self.refresh_account(&account).await {
                Ok(_) => summary.success += 1,
                Err(_) => summary.failed += 1,
            }
        }

        summary
    }

    /// Serialized read-modify-write on one account file.
    pub async fn with_account<F>(&self, account_id: &str, mutate: F) -> AppResult<Account>
    where
        F: FnOnce(&mut Account),
    {
        let lock = {
            let entry = self
                .write_locks
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            entry.value().clone()
        };
        let _guard = lock.lock().await;

        let mut account = self.store.load(account_id)?;
        mutate(&mut account);
        self.store.save(&account)?;
        Ok(account)
    }

    pub async fn record_success(&self, account_id: &str) -> AppResult<Account> {
        self.with_account(account_id, |account| account.record_success())
            .await
    }

    pub async fn record_failure(&self, account_id: &str, error: &str) -> AppResult<Account> {
        self.with_account(account_id, |account| account.record_failure(error))
            .await
    }

    pub async fn record_rate_limit(&self, account_id: &str) -> AppResult<Account> {
        self.with_account(account_id, |account| account.record_rate_limit())
            .await
    }

    pub async fn record_permission_denied(&self, account_id: &str) -> AppResult<Account> {
        self.with_account(account_id, |account| account.record_permission_denied())
            .await
    }

    pub async fn record_usage(
        &self,
        account_id: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> AppResult<Account> {
        self.with_account(account_id, |account| {
            account.record_usage(input_tokens, output_tokens)
        })
        .await
    }
}
