//! JSON file-per-table storage implementation
//!
//! Each table `name` lives at `<root>/<name>.json`. Writes go to a temporary
//! file in the same directory which is then renamed over the target, so a
//! crash mid-write leaves the previous snapshot intact.

use crate::storage::traits::{check_table_name, StorageResult, TableStore};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Flat-file JSON storage backend
pub struct JsonTableStore {
    root: PathBuf,
}

impl JsonTableStore {
    /// Opens (and creates if needed) a storage root directory
    pub fn new(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path_for(&self, table: &str) -> PathBuf {
        self.root.join(format!("{}.json", table))
    }

    fn collect(&self, dir: &Path, relative: &str, out: &mut Vec<String>) -> StorageResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let nested = if relative.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", relative, name)
            };

            if entry.file_type()?.is_dir() {
                self.collect(&entry.path(), &nested, out)?;
            } else if let Some(table) = nested.strip_suffix(".json") {
                out.push(table.to_string());
            }
        }

        Ok(())
    }
}

impl TableStore for JsonTableStore {
    fn load(&self, table: &str) -> StorageResult<Option<String>> {
        check_table_name(table)?;
        match fs::read_to_string(self.path_for(table)) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, table: &str, body: &str) -> StorageResult<()> {
        check_table_name(table)?;
        let path = self.path_for(table);
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut temp_file = NamedTempFile::new_in(parent)?;
        temp_file.write_all(body.as_bytes())?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(&path)?;

        Ok(())
    }

    fn remove(&self, table: &str) -> StorageResult<()> {
        check_table_name(table)?;
        match fs::remove_file(self.path_for(table)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut tables = Vec::new();
        self.collect(&self.root, "", &mut tables)?;
        tables.retain(|t| t.starts_with(prefix));
        tables.sort();
        Ok(tables)
    }

    fn describe(&self) -> String {
        format!("json files in {}", self.root.display())
    }
}
