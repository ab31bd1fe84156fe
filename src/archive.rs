//! Archive File Manager.
//!
//! Line-oriented append/remove over plain-text archive files, one entry per
//! line, with a keyed lock per absolute path so concurrent callers for the
//! *same* file are strictly serialized while different files proceed in
//! parallel. Writes are atomic: build the new content, write to a sibling
//! temp file, then rename over the target — a crash mid-write leaves the
//! original file untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};

pub struct ArchiveManager {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ArchiveManager {
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    pub async fn read(&self, path: &Path) -> CoreResult<Vec<String>> {
        let file_lock = self.lock_for(path).await;
        let _guard = file_lock.lock().await;
        Self::read_locked(path).await
    }

    async fn read_locked(path: &Path) -> CoreResult<Vec<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(contents.lines().filter(|l| !l.trim().is_empty()).map(|l| l.to_string()).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Appends `entries` not already present (unless `skip_check`), writing
    /// atomically. Returns only the entries actually written.
    pub async fn append(&self, path: &Path, entries: &[String], skip_check: bool) -> CoreResult<Vec<String>> {
        let file_lock = self.lock_for(path).await;
        let _guard = file_lock.lock().await;

        let mut existing = Self::read_locked(path).await?;
        let to_add: Vec<String> = if skip_check {
            entries.to_vec()
        } else {
            let seen: std::collections::HashSet<&str> = existing.iter().map(|s| s.as_str()).collect();
            entries.iter().filter(|e| !seen.contains(e.as_str())).cloned().collect()
        };
        if to_add.is_empty() {
            return Ok(Vec::new());
        }
        existing.extend(to_add.iter().cloned());
        Self::write_atomic(path, &existing).await?;
        Ok(to_add)
    }

    /// Rewrites the file without any of `entries`. Returns the entries that
    /// were actually present and removed.
    pub async fn remove(&self, path: &Path, entries: &[String]) -> CoreResult<Vec<String>> {
        let file_lock = self.lock_for(path).await;
        let _guard = file_lock.lock().await;

        let existing = Self::read_locked(path).await?;
        let remove_set: std::collections::HashSet<&str> = entries.iter().map(|s| s.as_str()).collect();
        let (kept, removed): (Vec<String>, Vec<String>) =
            existing.into_iter().partition(|e| !remove_set.contains(e.as_str()));
        Self::write_atomic(path, &kept).await?;
        Ok(removed)
    }

    async fn write_atomic(path: &Path, lines: &[String]) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!(
            "{}.tmp-{}",
            path.extension().and_then(|e| e.to_str()).unwrap_or("archive"),
            uuid::Uuid::new_v4()
        ));
        let mut content = lines.join("\n");
        if !lines.is_empty() {
            content.push('\n');
        }
        tokio::fs::write(&tmp, content).await.map_err(CoreError::from)?;
        tokio::fs::rename(&tmp, path).await.map_err(CoreError::from)?;
        Ok(())
    }

    /// Convenience check used by the Download Driver before spawning a
    /// subprocess.
    pub async fn contains(&self, path: &Path, archive_id: &str) -> CoreResult<bool> {
        Ok(self.read(path).await?.iter().any(|e| e == archive_id))
    }
}

impl Default for ArchiveManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_append_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        let mgr = ArchiveManager::new();
        let entries = vec!["youtube ABC".to_string()];
        let first = mgr.append(&path, &entries, false).await.unwrap();
        assert_eq!(first, entries);
        let second = mgr.append(&path, &entries, false).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(mgr.read(&path).await.unwrap(), entries);
    }

    #[tokio::test]
    async fn append_then_remove_restores_original_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        let mgr = ArchiveManager::new();
        tokio::fs::write(&path, "youtube ZZZ\n").await.unwrap();
        let before = tokio::fs::read_to_string(&path).await.unwrap();

        let entries = vec!["youtube ABC".to_string()];
        mgr.append(&path, &entries, false).await.unwrap();
        mgr.remove(&path, &entries).await.unwrap();

        let after = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn read_of_missing_file_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.log");
        let mgr = ArchiveManager::new();
        assert_eq!(mgr.read(&path).await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn contains_checks_archive_id_membership() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        let mgr = ArchiveManager::new();
        mgr.append(&path, &["youtube ABC".to_string()], false).await.unwrap();
        assert!(mgr.contains(&path, "youtube ABC").await.unwrap());
        assert!(!mgr.contains(&path, "youtube XYZ").await.unwrap());
    }

    #[tokio::test]
    async fn different_files_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(ArchiveManager::new());
        let p1 = dir.path().join("a.log");
        let p2 = dir.path().join("b.log");
        let m1 = Arc::clone(&mgr);
        let m2 = Arc::clone(&mgr);
        let t1 = tokio::spawn(async move { m1.append(&p1, &["x y".to_string()], false).await });
        let t2 = tokio::spawn(async move { m2.append(&p2, &["a b".to_string()], false).await });
        t1.await.unwrap().unwrap();
        t2.await.unwrap().unwrap();
    }
}
