//! One JSON file per account under the accounts directory.
//!
//! The store itself carries no locking; the pool serializes read-modify-write
//! cycles per account. Writes go through a temp file and rename so a reader
//! started after `save` returns always sees a complete record.

use std::fs;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};
use crate::models::Account;

#[derive(Debug, Clone)]
pub struct AccountStore {
    dir: PathBuf,
}

impl AccountStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save(&self, account: &Account) -> AppResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", account.account_id));
        let temp = self.dir.join(format!("{}.json.tmp", account.account_id));

        let content = serde_json::to_string_pretty(account)?;
        if let Err(e) = fs::write(&temp, content) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        fs::rename(&temp, &path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            AppError::Io(e)
        })
    }

    pub fn load(&self, account_id: &str) -> AppResult<Account> {
        let path = self.dir.join(format!("{}.json", account_id));
        if !path.exists() {
            return Err(AppError::NotFound(format!("account {}", account_id)));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// All account ids, sorted so rotation order is stable across calls.
    /// A missing directory means an empty pool, not an error.
    pub fn list(&self) -> AppResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn delete(&self, account_id: &str) -> AppResult<()> {
        let path = self.dir.join(format!("{}.json", account_id));
        if !path.exists() {
            return Err(AppError::NotFound(format!("account {}", account_id)));
        }
        Ok(fs::remove_file(path)?)
    }
}
