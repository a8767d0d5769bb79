use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use tempfile::Builder;

use crate::error::HarvestError;

/// Key/value object storage addressed by `/`-separated keys.
pub trait ObjectStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Vec<u8>, HarvestError>;
    fn put(&self, key: &str, content: &[u8]) -> Result<(), HarvestError>;
    fn exists(&self, key: &str) -> Result<bool, HarvestError>;
    fn list(&self, prefix: &str) -> Result<Vec<String>, HarvestError>;
}

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: Utf8PathBuf,
}

impl FsObjectStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn default_root() -> Result<Utf8PathBuf, HarvestError> {
        ProjectDirs::from("", "", "geofacts")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().to_path_buf()).ok())
            .ok_or_else(|| HarvestError::Storage("unable to resolve data directory".to_string()))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<Utf8PathBuf, HarvestError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        let parent = path
            .parent()
            .ok_or_else(|| HarvestError::Storage(format!("invalid destination path: {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Storage(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".geofacts-put")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Storage(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| HarvestError::Storage(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Storage(err.to_string()))?;
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, HarvestError> {
        let path = self.path_for(key)?;
        fs::read(path.as_std_path()).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => HarvestError::ObjectNotFound(key.to_string()),
            _ => HarvestError::Storage(format!("read {key}: {err}")),
        })
    }

    fn put(&self, key: &str, content: &[u8]) -> Result<(), HarvestError> {
        let path = self.path_for(key)?;
        Self::write_atomic(&path, content)
    }

    fn exists(&self, key: &str) -> Result<bool, HarvestError> {
        let path = self.path_for(key)?;
        Ok(path.as_std_path().is_file())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, HarvestError> {
        let trimmed = prefix.trim_end_matches('/');
        let base = if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.path_for(trimmed)?
        };
        if !base.as_std_path().is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for path in walk_files(base.as_std_path())? {
            let relative = path
                .strip_prefix(self.root.as_std_path())
                .map_err(|err| HarvestError::Storage(err.to_string()))?;
            let Some(relative) = relative.to_str() else {
                continue;
            };
            let key = relative.replace(std::path::MAIN_SEPARATOR, "/");
            if key.rsplit('/').next().is_some_and(|name| name.starts_with(".geofacts-put")) {
                continue;
            }
            keys.push(key);
        }
        keys.sort();
        Ok(keys)
    }
}

fn validate_key(key: &str) -> Result<(), HarvestError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(HarvestError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, HarvestError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| HarvestError::Storage(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| HarvestError::Storage(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                items.push(path);
            }
        }
    }
    Ok(items)
}

pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn temp_store() -> (tempfile::TempDir, FsObjectStore) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, FsObjectStore::new(root))
    }

    #[test]
    fn put_get_and_list() {
        let (_temp, store) = temp_store();
        store.put("run/quickfacts/15.csv", b"a,b").unwrap();
        store.put("run/search_results.json", b"{}").unwrap();

        assert!(store.exists("run/quickfacts/15.csv").unwrap());
        assert!(!store.exists("run/quickfacts/16.csv").unwrap());
        assert_eq!(store.get("run/quickfacts/15.csv").unwrap(), b"a,b");
        assert_eq!(
            store.list("run/quickfacts").unwrap(),
            vec!["run/quickfacts/15.csv".to_string()]
        );
        assert_eq!(store.list("missing/").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn rejects_escaping_keys() {
        let (_temp, store) = temp_store();
        assert_matches!(store.get("../etc/passwd"), Err(HarvestError::InvalidKey(_)));
        assert_matches!(store.put("/abs", b""), Err(HarvestError::InvalidKey(_)));
        assert_matches!(store.exists("a//b"), Err(HarvestError::InvalidKey(_)));
    }

    #[test]
    fn missing_object_is_not_found() {
        let (_temp, store) = temp_store();
        assert_matches!(store.get("nope.json"), Err(HarvestError::ObjectNotFound(_)));
    }

    #[test]
    fn join_key_trims_slashes() {
        assert_eq!(join_key("run/", "a.json"), "run/a.json");
        assert_eq!(join_key("", "a.json"), "a.json");
    }
}
