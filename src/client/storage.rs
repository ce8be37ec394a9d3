use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ClientError;

/// 持久化到磁盘的会话三元组，时间戳为 ISO-8601
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub token: String,
    pub expiration: DateTime<Utc>,
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct SessionStorage {
    path: PathBuf,
}

impl SessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<PersistedSession>, ClientError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, session: &PersistedSession) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(session)?)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), ClientError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> PersistedSession {
        PersistedSession {
            token: "signed-token".into(),
            expiration: Utc::now() + Duration::seconds(3600),
            user_id: "user-1".into(),
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SessionStorage::new(dir.path().join("session.json"));
        let session = sample();

        storage.save(&session).unwrap();
        assert_eq!(storage.load().unwrap(), Some(session));
    }

    #[test]
    fn load_of_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SessionStorage::new(dir.path().join("missing.json"));
        assert_eq!(storage.load().unwrap(), None);
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SessionStorage::new(dir.path().join("session.json"));

        storage.save(&sample()).unwrap();
        storage.clear().unwrap();
        storage.clear().unwrap();
        assert_eq!(storage.load().unwrap(), None);
    }

    #[test]
    fn expiration_is_persisted_as_iso8601() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let storage = SessionStorage::new(path.clone());

        storage.save(&sample()).unwrap();
        let raw = std::fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let expiration = value["expiration"].as_str().unwrap();
        assert!(expiration.contains('T'));
        assert!(value["userId"].is_string());
    }
}
