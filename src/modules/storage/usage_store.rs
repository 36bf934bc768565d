//! Daily per-account usage aggregates.
//!
//! One file per (date, account) pair named `YYYY-MM-DD_{account_id}.json`;
//! updates are load-add-write. History queries scan the directory and filter
//! on the date prefix.

use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    pub date: String,
    pub account_id: String,
    pub total_tokens: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub request_count: i64,
}

#[derive(Debug, Clone)]
pub struct UsageStore {
    dir: PathBuf,
}

impl UsageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn record(&self, account_id: &str, input_tokens: i64, output_tokens: i64) -> AppResult<UsageRecord> {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        self.record_on(&today, account_id, input_tokens, output_tokens)
    }

    fn record_on(
        &self,
        date: &str,
        account_id: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> AppResult<UsageRecord> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}_{}.json", date, account_id));

        let mut record = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => UsageRecord::default(),
        };
        record.date = date.to_string();
        record.account_id = account_id.to_string();
        record.input_tokens += input_tokens;
        record.output_tokens += output_tokens;
        record.total_tokens += input_tokens + output_tokens;
        record.request_count += 1;

        fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        Ok(record)
    }

    /// All records from the last `days` days (directory scan; files with an
    /// unparsable date prefix are skipped).
    pub fn history(&self, days: i64) -> AppResult<Vec<UsageRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let cutoff = chrono::Utc::now().date_naive() - chrono::Duration::days(days);
        let mut records = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".json") {
                continue;
            }
            let Some((date_part, _)) = name.split_once('_') else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
                continue;
            };
            if date < cutoff {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            if let Ok(record) = serde_json::from_str::<UsageRecord>(&content) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| (a.date.as_str(), a.account_id.as_str()).cmp(&(b.date.as_str(), b.account_id.as_str())));
        Ok(records)
    }
}
