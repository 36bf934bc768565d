//! API-key persistence, one JSON file per key.
//!
//! Keys may contain `:` (e.g. "sk-proj:xyz"), which is mapped to `_` in the
//! filename. Delete refuses anything that could walk out of the keys
//! directory.

use std::fs;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};
use crate::models::ApiKey;

#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

fn sanitize_key_filename(key: &str) -> String {
    key.replace(':', "_")
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save(&self, key: &ApiKey) -> AppResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("{}.json", sanitize_key_filename(&key.key)));
        let content = serde_json::to_string_pretty(key)?;
        Ok(fs::write(path, content)?)
    }

    pub fn load(&self, key: &str) -> AppResult<ApiKey> {
        let path = self.dir.join(format!("{}.json", sanitize_key_filename(key)));
        if !path.exists() {
            return Err(AppError::NotFound("api key".to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn list(&self) -> AppResult<Vec<ApiKey>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(key) = serde_json::from_str::<ApiKey>(&content) {
                keys.push(key);
            }
        }
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(keys)
    }

    pub fn delete(&self, key: &str) -> AppResult<()> {
        if key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(AppError::Config("invalid key format".to_string()));
        }
        let path = self.dir.join(format!("{}.json", sanitize_key_filename(key)));
        if !path.exists() {
            return Err(AppError::NotFound("api key".to_string()));
        }
        Ok(fs::remove_file(path)?)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.dir
            .join(format!("{}.json", sanitize_key_filename(key)))
            .exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_is_mapped_to_underscore_in_filename() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KeyStore::new(dir.path());

        store.save(&ApiKey::new("sk:proj:abc", "ci")).expect("save");
        assert!(dir.path().join("sk_proj_abc.json").exists());

        let loaded = store.load("sk:proj:abc").expect("load");
        assert_eq!(loaded.key, "sk:proj:abc");
        assert!(store.exists("sk:proj:abc"));
    }

    #[test]
    fn delete_rejects_path_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KeyStore::new(dir.path());

        for bad in ["../escape", "a/b", "a\\b", ".."] {
            let err = store.delete(bad).expect_err("must reject");
            assert!(matches!(err, AppError::Config(_)), "key {:?}", bad);
        }
    }

    #[test]
    fn list_returns_saved_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KeyStore::new(dir.path());
        store.save(&ApiKey::new("sk-b", "two")).expect("save");
        store.save(&ApiKey::new("sk-a", "one")).expect("save");

        let keys = store.list().expect("list");
        assert_eq!(
            keys.iter().map(|k| k.key.as_str()).collect::<Vec<_>>(),
            vec!["sk-a", "sk-b"]
        );
    }

    #[test]
    fn load_missing_key_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KeyStore::new(dir.path());
        assert!(store.load("sk-ghost").expect_err("load").is_not_found());
        assert!(store.delete("sk-ghost").expect_err("delete").is_not_found());
    }
}
