use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;

use crate::error::ClimError;

/// Local copies of downloaded catalog tables, keyed by their URL.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: Utf8PathBuf,
}

impl SnapshotStore {
    pub fn new() -> Result<Self, ClimError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir()
                        .join(".cache")
                        .join("cmip-climatology")
                        .join("catalogs"),
                )
                .ok()
            })
            .ok_or_else(|| {
                ClimError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn snapshot_path(&self, url: &str) -> Utf8PathBuf {
        let name = url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches(".gz")
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' { ch } else { '_' })
            .collect::<String>();
        self.root.join(name)
    }

    pub fn read(&self, url: &str) -> Result<Option<Vec<u8>>, ClimError> {
        let path = self.snapshot_path(url);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        fs::read(path.as_std_path())
            .map(Some)
            .map_err(|err| ClimError::Filesystem(format!("read {path}: {err}")))
    }

    pub fn write(&self, url: &str, content: &[u8]) -> Result<Utf8PathBuf, ClimError> {
        let path = self.snapshot_path(url);
        Self::write_bytes_atomic(&path, content)?;
        Ok(path)
    }

    pub fn clear(&self) -> Result<(), ClimError> {
        if self.root.as_std_path().exists() {
            fs::remove_dir_all(self.root.as_std_path())
                .map_err(|err| ClimError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ClimError> {
        let parent = match path.parent() {
            Some(parent) if parent.as_str().is_empty() => Utf8Path::new("."),
            Some(parent) => parent,
            None => return Err(ClimError::Filesystem("invalid destination path".to_string())),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ClimError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("cmip-clim-snapshot")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| ClimError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| ClimError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| ClimError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_paths_are_flat_file_names() {
        let store = SnapshotStore::new_with_root(Utf8PathBuf::from("/tmp/snapshots"));
        let path = store.snapshot_path("https://storage.googleapis.com/cmip6/pangeo-cmip6.csv.gz");
        assert_eq!(
            path,
            Utf8PathBuf::from("/tmp/snapshots/storage.googleapis.com_cmip6_pangeo-cmip6.csv")
        );
    }
}
