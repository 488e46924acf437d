//! Session storage passed explicitly to everything that needs a token.
//!
//! The panels keep their session in a flat key/value space (`accessToken`,
//! `refreshToken`, `user`, ...). Instead of reading that space ambiently, every
//! component receives an `Arc<dyn Session>`, so tests inject a
//! [`MemorySession`] and the CLI uses a [`FileSession`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};

pub const ACCESS_TOKEN: &str = "accessToken";
/// Older key some pages still write the token under
pub const LEGACY_TOKEN: &str = "token";
pub const REFRESH_TOKEN: &str = "refreshToken";
pub const USER: &str = "user";
pub const USER_DATA: &str = "userData";
pub const GENERATED_DOCUMENTS: &str = "generatedDocuments";

pub trait Session: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;

    /// Bearer token, preferring `accessToken` over the legacy `token` key.
    /// Blank values count as absent.
    fn access_token(&self) -> Option<String> {
        [ACCESS_TOKEN, LEGACY_TOKEN]
            .into_iter()
            .filter_map(|key| self.get(key))
            .find(|token| !token.trim().is_empty())
    }

    /// Drop every credential and cached user record.
    fn clear_credentials(&self) -> anyhow::Result<()> {
        for key in [ACCESS_TOKEN, LEGACY_TOKEN, REFRESH_TOKEN, USER, USER_DATA] {
            self.remove(key)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySession {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::new();
        session
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ACCESS_TOKEN.to_string(), token.into());
        session
    }
}

impl Session for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }
}

/// Session persisted as a JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileSession {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileSession {
    /// Open (or start) a session file. A missing file is an empty session; an
    /// unreadable one is logged and treated as empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring malformed session file");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read session file");
                HashMap::new()
            }
        };
        debug!(path = %path.display(), keys = entries.len(), "Opened session file");
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    fn persist(&self, entries: &HashMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(entries)?)?;
        Ok(())
    }
}

impl Session for FileSession {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_prefers_current_key_and_skips_blanks() {
        let session = MemorySession::new();
        assert_eq!(session.access_token(), None);

        session.set(LEGACY_TOKEN, "legacy".to_string()).unwrap();
        assert_eq!(session.access_token().as_deref(), Some("legacy"));

        session.set(ACCESS_TOKEN, "  ".to_string()).unwrap();
        assert_eq!(session.access_token().as_deref(), Some("legacy"));

        session.set(ACCESS_TOKEN, "fresh".to_string()).unwrap();
        assert_eq!(session.access_token().as_deref(), Some("fresh"));
    }

    #[test]
    fn clear_credentials_keeps_document_hints() {
        let session = MemorySession::with_token("abc");
        session.set(GENERATED_DOCUMENTS, "[]".to_string()).unwrap();
        session.clear_credentials().unwrap();
        assert_eq!(session.access_token(), None);
        assert_eq!(session.get(GENERATED_DOCUMENTS).as_deref(), Some("[]"));
    }

    #[test]
    fn file_session_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let session = FileSession::open(&path);
        session.set(ACCESS_TOKEN, "persisted".to_string()).unwrap();
        drop(session);

        let reopened = FileSession::open(&path);
        assert_eq!(reopened.access_token().as_deref(), Some("persisted"));

        reopened.remove(ACCESS_TOKEN).unwrap();
        assert_eq!(FileSession::open(&path).access_token(), None);
    }

    #[test]
    fn malformed_file_is_an_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(FileSession::open(&path).get(USER), None);
    }
}
