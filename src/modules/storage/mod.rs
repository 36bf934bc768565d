mod account_store;
mod key_store;
mod usage_store;

pub use account_store::AccountStore;
pub use key_store::KeyStore;
pub use usage_store::{UsageRecord, UsageStore};
