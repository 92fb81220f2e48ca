//! Task stores: where task records and their result tables come from
//!
//! - [`FileTaskStore`] reads `<dir>/<task_id>.{json,yaml,yml}` files and caches
//!   parsed files in a DashMap, keyed by file stem and checked against the file's
//!   modification time
//! - [`MemoryTaskStore`] keeps tasks in memory (embedding, tests)
//!
//! Task file shape:
//!
//! ```yaml
//! task_id: "42"            # optional display id, defaults to the file stem
//! status: completed
//! metadata: { model_name: gpt-mini }
//! columns: [run_index, latency_ms, tokens_used]   # optional column order
//! results:
//!   - { run_index: 1, latency_ms: 100, tokens_used: 50 }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{anyhow, Context};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::runner::{DatasetLoader, TaskLookup, TaskRecord, TaskStatus};
use crate::table::Table;

/// Recognised task file extensions, in lookup priority order
pub const TASK_FILE_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

#[derive(Debug, Clone, Deserialize)]
struct TaskFile {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    status: TaskStatus,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    results: Vec<Map<String, Value>>,
}

struct CachedFile {
    file: Arc<TaskFile>,
    modified: Option<SystemTime>,
}

/// Directory of task files
///
/// Files are addressed by stem. A file may declare a different `task_id`; the
/// record carries that id and the store remembers which file it came from, so
/// `load_dataset` reads the same file `find_task` did. A cached parse is reused
/// only while the file's modification time is unchanged.
pub struct FileTaskStore {
    dir: PathBuf,
    cache: DashMap<String, CachedFile>,
    // declared task id -> file stem
    aliases: DashMap<String, String>,
}

impl FileTaskStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            cache: DashMap::new(),
            aliases: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Task ids present in the directory, sorted
    pub fn list_tasks(&self) -> anyhow::Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("Failed to scan {:?}", self.dir))?;
            let path = entry.path();
            if !entry.file_type().is_file() || !has_task_extension(path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Drop a cached task file so the next read hits the disk
    pub fn invalidate(&self, task_id: &str) {
        self.cache.remove(task_id);
    }

    fn locate(&self, task_id: &str) -> Option<PathBuf> {
        if !is_safe_task_id(task_id) {
            return None;
        }
        TASK_FILE_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", task_id, ext)))
            .find(|path| path.is_file())
    }

    fn read(&self, task_id: &str) -> anyhow::Result<Option<Arc<TaskFile>>> {
        let Some(path) = self.locate(task_id) else {
            self.cache.remove(task_id);
            return Ok(None);
        };
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        if let Some(cached) = self.cache.get(task_id) {
            if modified.is_some() && cached.modified == modified {
                return Ok(Some(Arc::clone(&cached.file)));
            }
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read task file {:?}", path))?;
        let file: TaskFile = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse task file {:?}", path))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse task file {:?}", path))?
        };

        debug!(task_id, path = ?path, rows = file.results.len(), "Loaded task file");
        let file = Arc::new(file);
        self.cache.insert(
            task_id.to_string(),
            CachedFile {
                file: Arc::clone(&file),
                modified,
            },
        );
        Ok(Some(file))
    }
}

impl TaskLookup for FileTaskStore {
    fn find_task(&self, task_id: &str) -> anyhow::Result<Option<TaskRecord>> {
        let Some(file) = self.read(task_id)? else {
            return Ok(None);
        };
        let declared = file.task_id.clone().unwrap_or_else(|| task_id.to_string());
        if declared != task_id {
            self.aliases.insert(declared.clone(), task_id.to_string());
        }
        Ok(Some(TaskRecord {
            task_id: declared,
            status: file.status,
            metadata: file.metadata.clone(),
        }))
    }
}

impl DatasetLoader for FileTaskStore {
    fn load_dataset(&self, task: &TaskRecord) -> anyhow::Result<Table> {
        let key = self
            .aliases
            .get(&task.task_id)
            .map(|stem| stem.value().clone())
            .unwrap_or_else(|| task.task_id.clone());
        let file = self
            .read(&key)?
            .ok_or_else(|| anyhow!("no task file for '{}' in {:?}", task.task_id, self.dir))?;
        Ok(Table::from_records(&file.columns, &file.results)?)
    }
}

fn has_task_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| TASK_FILE_EXTENSIONS.contains(&ext))
}

/// Task ids map to file names; anything that could escape the directory is refused
fn is_safe_task_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && !task_id.starts_with('.')
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// In-memory task store
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<String, (TaskRecord, Table)>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: TaskRecord, table: Table) {
        self.tasks.insert(record.task_id.clone(), (record, table));
    }

    pub fn remove(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.remove(task_id).map(|(_, (record, _))| record)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl TaskLookup for MemoryTaskStore {
    fn find_task(&self, task_id: &str) -> anyhow::Result<Option<TaskRecord>> {
        Ok(self.tasks.get(task_id).map(|entry| entry.0.clone()))
    }
}

impl DatasetLoader for MemoryTaskStore {
    fn load_dataset(&self, task: &TaskRecord) -> anyhow::Result<Table> {
        self.tasks
            .get(&task.task_id)
            .map(|entry| entry.1.clone())
            .ok_or_else(|| anyhow!("no results stored for task '{}'", task.task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const YAML_TASK: &str = r#"
status: completed
metadata:
  model_name: gpt-mini
columns: [run_index, latency_ms, tokens_used]
results:
  - { run_index: 1, latency_ms: 100, tokens_used: 50 }
  - { run_index: 2, latency_ms: 200 }
"#;

    #[test]
    fn reads_yaml_task_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("42.yaml"), YAML_TASK).unwrap();
        let store = FileTaskStore::new(dir.path());

        let task = store.find_task("42").unwrap().unwrap();
        assert_eq!(task.task_id, "42");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.metadata["model_name"], "gpt-mini");

        let table = store.load_dataset(&task).unwrap();
        assert_eq!(table.column_names(), ["run_index", "latency_ms", "tokens_used"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1][2], Cell::Null);
    }

    #[test]
    fn reads_json_task_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("7.json"),
            r#"{"task_id": "7", "status": "failed", "results": [{"latency_ms": 1.5}]}"#,
        )
        .unwrap();
        let store = FileTaskStore::new(dir.path());

        let task = store.find_task("7").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        let table = store.load_dataset(&task).unwrap();
        assert_eq!(table.numeric_column("latency_ms"), vec![Some(1.5)]);
    }

    #[test]
    fn missing_and_unsafe_ids_are_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileTaskStore::new(dir.path());

        assert!(store.find_task("nope").unwrap().is_none());
        assert!(store.find_task("../etc/passwd").unwrap().is_none());
        assert!(store.find_task(".hidden").unwrap().is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let store = FileTaskStore::new(dir.path());

        let err = store.find_task("bad").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse task file"));
    }

    #[test]
    fn list_tasks_scans_only_task_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.yaml"), YAML_TASK).unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/c.yaml"), YAML_TASK).unwrap();

        let store = FileTaskStore::new(dir.path());
        assert_eq!(store.list_tasks().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn list_tasks_on_missing_dir_is_empty() {
        let store = FileTaskStore::new("/definitely/not/here");
        assert!(store.list_tasks().unwrap().is_empty());
    }

    #[test]
    fn declared_id_differing_from_file_name_still_loads() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("42.yaml"), format!("task_id: run-42\n{}", YAML_TASK)).unwrap();
        let store = FileTaskStore::new(dir.path());

        let task = store.find_task("42").unwrap().unwrap();
        assert_eq!(task.task_id, "run-42");
        let table = store.load_dataset(&task).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn cache_follows_file_modification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.yaml");
        fs::write(&path, "status: running\n").unwrap();
        let store = FileTaskStore::new(dir.path());
        assert_eq!(store.find_task("1").unwrap().unwrap().status, TaskStatus::Running);
        assert_eq!(store.find_task("1").unwrap().unwrap().status, TaskStatus::Running);

        fs::write(&path, "status: completed\n").unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();
        assert_eq!(store.find_task("1").unwrap().unwrap().status, TaskStatus::Completed);

        fs::remove_file(&path).unwrap();
        assert!(store.find_task("1").unwrap().is_none());
    }

    #[test]
    fn invalidate_forces_a_reparse() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("1.yaml"), "status: running\n").unwrap();
        let store = FileTaskStore::new(dir.path());
        store.find_task("1").unwrap();

        store.invalidate("1");
        assert!(store.cache.get("1").is_none());
        assert_eq!(store.find_task("1").unwrap().unwrap().status, TaskStatus::Running);
        assert!(store.cache.get("1").is_some());
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryTaskStore::new();
        let table = Table::new(["x"]).unwrap().with_row(vec![Cell::Int(1)]).unwrap();
        store.insert(TaskRecord::new("t", TaskStatus::Completed), table.clone());

        let task = store.find_task("t").unwrap().unwrap();
        assert_eq!(store.load_dataset(&task).unwrap(), table);
        assert_eq!(store.remove("t").map(|r| r.task_id), Some("t".to_string()));
        assert!(store.is_empty());
        assert!(store.load_dataset(&task).is_err());
    }
}
