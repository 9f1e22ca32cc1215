use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{domain::UserId, errors::Error, session::StoredSession, Result};

/// Persistence port for user records.
///
/// `save` receives every record touched by one state transition (two for pair/unpair)
/// and must write them together or not at all.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn load(&self, user: UserId) -> Result<Option<StoredSession>>;
    async fn load_all(&self) -> Result<Vec<StoredSession>>;
    async fn save(&self, records: &[StoredSession]) -> Result<()>;
}

/// In-process backend (tests, throwaway runs).
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<UserId, StoredSession>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn load(&self, user: UserId) -> Result<Option<StoredSession>> {
        Ok(self.records.lock().await.get(&user).cloned())
    }

    async fn load_all(&self) -> Result<Vec<StoredSession>> {
        let mut out: Vec<StoredSession> = self.records.lock().await.values().cloned().collect();
        out.sort_by_key(|s| s.user_id);
        Ok(out)
    }

    async fn save(&self, records: &[StoredSession]) -> Result<()> {
        let mut map = self.records.lock().await;
        for r in records {
            map.insert(r.user_id, r.clone());
        }
        Ok(())
    }
}

const STORE_FILE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    sessions: Vec<StoredSession>,
}

/// Single JSON document holding every known user.
///
/// The whole document is rewritten on each save (temp file + rename), so a crash
/// never leaves a half-written store behind.
pub struct JsonFileBackend {
    path: PathBuf,
    records: Mutex<BTreeMap<UserId, StoredSession>>,
}

impl JsonFileBackend {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = read_store_file(&path).await?;
        tracing::info!(
            path = %path.display(),
            users = records.len(),
            "session store loaded"
        );
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, records: &BTreeMap<UserId, StoredSession>) -> Result<()> {
        let doc = StoreFile {
            version: STORE_FILE_VERSION,
            sessions: records.values().cloned().collect(),
        };
        let txt = serde_json::to_string_pretty(&doc)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, txt).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

async fn read_store_file(path: &Path) -> Result<BTreeMap<UserId, StoredSession>> {
    let txt = match tokio::fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    if txt.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let doc: StoreFile = serde_json::from_str(&txt)?;
    if doc.version != STORE_FILE_VERSION {
        return Err(Error::Storage(format!(
            "unsupported session store version {} in {}",
            doc.version,
            path.display()
        )));
    }
    Ok(doc.sessions.into_iter().map(|s| (s.user_id, s)).collect())
}

#[async_trait]
impl SessionBackend for JsonFileBackend {
    async fn load(&self, user: UserId) -> Result<Option<StoredSession>> {
        Ok(self.records.lock().await.get(&user).cloned())
    }

    async fn load_all(&self) -> Result<Vec<StoredSession>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn save(&self, records: &[StoredSession]) -> Result<()> {
        let mut current = self.records.lock().await;
        let mut next = current.clone();
        for r in records {
            next.insert(r.user_id, r.clone());
        }
        // Only adopt the new map once it is on disk.
        self.write(&next).await?;
        *current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use chrono::{TimeZone, Utc};

    fn tmp_path(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        PathBuf::from(format!(
            "/tmp/{prefix}-{}-{ts}/sessions.json",
            std::process::id()
        ))
    }

    fn record(id: i64, state: SessionState, partner: Option<i64>) -> StoredSession {
        StoredSession {
            user_id: UserId(id),
            state,
            partner_id: partner.map(UserId),
            premium: false,
            premium_expiry: None,
            blocked: false,
        }
    }

    #[tokio::test]
    async fn memory_backend_overwrites_by_user() {
        let b = MemoryBackend::new();
        b.save(&[record(2, SessionState::Idle, None)]).await.unwrap();
        b.save(&[record(1, SessionState::Searching, None)])
            .await
            .unwrap();
        b.save(&[record(2, SessionState::Searching, None)])
            .await
            .unwrap();

        let all = b.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].user_id, UserId(1));
        assert_eq!(all[1].state, SessionState::Searching);
        assert!(b.load(UserId(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_backend_round_trips_across_reopen() {
        let path = tmp_path("pairchat-store");
        let expiry = Utc.with_ymd_and_hms(2031, 5, 1, 12, 0, 0).unwrap();

        let a = record(10, SessionState::Paired, Some(11));
        let b = record(11, SessionState::Paired, Some(10));
        let c = StoredSession {
            user_id: UserId(12),
            state: SessionState::Idle,
            partner_id: None,
            premium: true,
            premium_expiry: Some(expiry),
            blocked: true,
        };

        {
            let backend = JsonFileBackend::open(&path).await.unwrap();
            backend.save(&[a.clone(), b.clone()]).await.unwrap();
            backend.save(&[c.clone()]).await.unwrap();
        }

        let reopened = JsonFileBackend::open(&path).await.unwrap();
        assert_eq!(reopened.load(UserId(10)).await.unwrap(), Some(a));
        assert_eq!(reopened.load(UserId(11)).await.unwrap(), Some(b));
        assert_eq!(reopened.load(UserId(12)).await.unwrap(), Some(c));
        assert_eq!(reopened.load_all().await.unwrap().len(), 3);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn json_backend_rejects_unknown_version() {
        let path = tmp_path("pairchat-store-version");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"version": 99, "sessions": []}"#).unwrap();

        let err = JsonFileBackend::open(&path).await.err().unwrap();
        assert!(matches!(err, Error::Storage(_)));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
