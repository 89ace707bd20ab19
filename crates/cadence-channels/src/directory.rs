//! Tenant user directory — maps platform user references from event
//! payloads to channel DM destinations.
//!
//! Backed by a JSON file of `tenant id → user ref → destination`,
//! reloadable without restarting the engine. An absent mapping is a
//! normal lookup miss; the dispatcher decides what that means.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use cadence_core::{CadenceError, DirectoryUser, Result, UserDirectory};

type DirectoryMap = HashMap<String, HashMap<String, String>>;

pub struct FileUserDirectory {
    path: PathBuf,
    entries: RwLock<DirectoryMap>,
}

impl FileUserDirectory {
    /// Load the directory file. A missing file yields an empty directory.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = Self::read_file(path)?;
        tracing::info!(
            "📇 User directory loaded: {} tenant(s) from {}",
            entries.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    /// Empty directory bound to `path`; `reload` can populate it later.
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Re-read the directory file (tenant settings changed).
    pub fn reload(&self) -> Result<()> {
        let fresh = Self::read_file(&self.path)?;
        *self.entries.write().expect("directory lock poisoned") = fresh;
        Ok(())
    }

    fn read_file(path: &Path) -> Result<DirectoryMap> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CadenceError::config(format!("directory file {}: {e}", path.display())))
    }
}

#[async_trait]
impl UserDirectory for FileUserDirectory {
    async fn resolve(&self, tenant_id: &str, user_ref: &str) -> Result<Option<DirectoryUser>> {
        let entries = self.entries.read().expect("directory lock poisoned");
        Ok(entries
            .get(tenant_id)
            .and_then(|tenant| tenant.get(user_ref))
            .map(|destination| DirectoryUser {
                user_id: user_ref.to_string(),
                dm_destination: destination.clone(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_directory(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_resolve_known_and_unknown() {
        let path = write_directory(
            "cadence-dir-test.json",
            r#"{"t1": {"u1": "dm-channel-1", "u2": "dm-channel-2"}}"#,
        );
        let dir = FileUserDirectory::open(&path).unwrap();

        let user = dir.resolve("t1", "u1").await.unwrap().unwrap();
        assert_eq!(user.dm_destination, "dm-channel-1");
        assert!(dir.resolve("t1", "u9").await.unwrap().is_none());
        // Tenant scoping: same ref, different tenant.
        assert!(dir.resolve("t2", "u1").await.unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_directory() {
        let path = std::env::temp_dir().join("cadence-dir-missing.json");
        std::fs::remove_file(&path).ok();
        let dir = FileUserDirectory::open(&path).unwrap();
        assert!(dir.resolve("t1", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes() {
        let path = write_directory("cadence-dir-reload.json", r#"{"t1": {"u1": "old"}}"#);
        let dir = FileUserDirectory::open(&path).unwrap();
        std::fs::write(&path, r#"{"t1": {"u1": "new"}}"#).unwrap();
        dir.reload().unwrap();
        let user = dir.resolve("t1", "u1").await.unwrap().unwrap();
        assert_eq!(user.dm_destination, "new");
        std::fs::remove_file(&path).ok();
    }
}
