//! File-backed registry store.
//!
//! Records are kept as JSON lines, one node per line, so adding nodes is an
//! append under a writer lock instead of a read-modify-write of the whole
//! file. A file holding a single JSON array (the older layout) is still
//! readable and is rewritten as JSON lines on the first append.
//!
//! Compaction writes the new contents to a temp file next to the registry
//! and renames it into place.
//!
//! A crash in the middle of an append leaves an unterminated last line.
//! Loading skips such a line when it does not parse, and the next append
//! rewrites the file without it before adding new records.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{NodeRecord, RegistryStore};
use crate::error::{Error, Result};

/// Registry persisted in a local file.
#[derive(Debug)]
pub struct FileRegistryStore {
    path: PathBuf,
    /// Serializes every writer of the file
    write_lock: Mutex<()>,
}

impl FileRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_contents(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(&self, records: &[NodeRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(encode_lines(records)?.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn load(&self) -> Result<Vec<NodeRecord>> {
        match self.read_contents().await? {
            Some(contents) => parse_registry(&contents),
            None => {
                debug!(path = %self.path.display(), "No registry file, starting empty");
                Ok(Vec::new())
            }
        }
    }

    async fn append(&self, records: &[NodeRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;

        if let Some(contents) = self.read_contents().await? {
            let legacy = is_legacy_array(&contents);
            if legacy || has_torn_tail(&contents) {
                let mut all = parse_registry(&contents)?;
                all.extend_from_slice(records);
                if legacy {
                    info!(
                        path = %self.path.display(),
                        records = all.len(),
                        "Migrating registry to line format"
                    );
                } else {
                    info!(
                        path = %self.path.display(),
                        records = all.len(),
                        "Rewriting registry with unterminated last line"
                    );
                }
                return self.write_atomic(&all).await;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(encode_lines(records)?.as_bytes()).await?;
        file.sync_data().await?;

        debug!(path = %self.path.display(), appended = records.len(), "Registry appended");
        Ok(())
    }

    async fn compact(&self, records: &[NodeRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_atomic(records).await?;
        info!(path = %self.path.display(), records = records.len(), "Registry compacted");
        Ok(())
    }
}

fn is_legacy_array(contents: &str) -> bool {
    contents.trim_start().starts_with('[')
}

fn has_torn_tail(contents: &str) -> bool {
    !contents.is_empty() && !contents.ends_with('\n')
}

fn encode_lines(records: &[NodeRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse either layout. Line numbers in errors are 1-based.
///
/// In line layout an unparsable last line with no trailing newline is a
/// partial write and is dropped; any other bad line is an error.
fn parse_registry(contents: &str) -> Result<Vec<NodeRecord>> {
    if is_legacy_array(contents) {
        return serde_json::from_str(contents).map_err(|e| Error::CorruptRegistry {
            line: e.line(),
            reason: e.to_string(),
        });
    }

    let torn = has_torn_tail(contents);
    let lines: Vec<(usize, &str)> = contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();
    let last = lines.len();

    let mut records = Vec::with_capacity(last);
    for (pos, (i, line)) in lines.into_iter().enumerate() {
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) if torn && pos + 1 == last => {
                warn!(line = i + 1, error = %e, "Skipping partially written registry record");
            }
            Err(e) => {
                return Err(Error::CorruptRegistry {
                    line: i + 1,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(i: usize) -> NodeRecord {
        NodeRecord {
            site: format!("http://node-{i}:9000"),
            alias: format!("minio{i}"),
            token: "dG9rZW4=".into(),
            access_key: "YWs=".into(),
            secret_key: "c2s=".into(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileRegistryStore::new(dir.path().join("registry.jsonl"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileRegistryStore::new(dir.path().join("registry.jsonl"));

        store.append(&[record(1)]).await.unwrap();
        store.append(&[record(2), record(3)]).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, vec![record(1), record(2), record(3)]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileRegistryStore::new(dir.path().join("registry.jsonl")));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.append(&[record(i)]).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut sites: Vec<String> = store
            .load()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.site)
            .collect();
        sites.sort();
        sites.dedup();
        assert_eq!(sites.len(), 16);
    }

    #[tokio::test]
    async fn test_reads_and_migrates_array_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let legacy = serde_json::to_string_pretty(&vec![record(1), record(2)]).unwrap();
        tokio::fs::write(&path, legacy).await.unwrap();

        let store = FileRegistryStore::new(&path);
        assert_eq!(store.load().await.unwrap().len(), 2);

        store.append(&[record(3)]).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!contents.trim_start().starts_with('['));
        assert_eq!(contents.lines().count(), 3);
        assert_eq!(
            store.load().await.unwrap(),
            vec![record(1), record(2), record(3)]
        );
    }

    #[tokio::test]
    async fn test_corrupt_line_reports_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.jsonl");
        let good = serde_json::to_string(&record(1)).unwrap();
        tokio::fs::write(&path, format!("{good}\n{{not json\n"))
            .await
            .unwrap();

        let result = FileRegistryStore::new(&path).load().await;
        assert_matches!(result, Err(Error::CorruptRegistry { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_partial_last_line_is_skipped_and_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.jsonl");
        let good = serde_json::to_string(&record(1)).unwrap();
        let second = serde_json::to_string(&record(2)).unwrap();
        let partial = &second[..20];
        tokio::fs::write(&path, format!("{good}\n{partial}"))
            .await
            .unwrap();

        let store = FileRegistryStore::new(&path);
        assert_eq!(store.load().await.unwrap(), vec![record(1)]);

        store.append(&[record(3)]).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.ends_with('\n'));
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(store.load().await.unwrap(), vec![record(1), record(3)]);
    }

    #[tokio::test]
    async fn test_unterminated_valid_last_line_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.jsonl");
        let good = serde_json::to_string(&record(1)).unwrap();
        tokio::fs::write(&path, good).await.unwrap();

        let store = FileRegistryStore::new(&path);
        store.append(&[record(2)]).await.unwrap();

        assert_eq!(store.load().await.unwrap(), vec![record(1), record(2)]);
    }

    #[tokio::test]
    async fn test_compact_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.jsonl");
        let store = FileRegistryStore::new(&path);

        store
            .append(&[record(1), record(2), record(3)])
            .await
            .unwrap();
        store.compact(&[record(2)]).await.unwrap();

        assert_eq!(store.load().await.unwrap(), vec![record(2)]);
        assert!(!path.with_extension("tmp").exists());
    }
}
