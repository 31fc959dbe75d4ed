//! Small JSON state records kept per rig.
//!
//! Each record is written by creating the directory if needed and
//! overwriting the whole file. There is no locking; one process per rig.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{Result, WatererError};
use crate::safety::HistorySnapshot;
use crate::schedule::ScheduleProgress;
use crate::scale::OffsetCache;

fn io_err(path: &Path, e: impl std::fmt::Display) -> eyre::Report {
    eyre::Report::new(WatererError::Io(format!("{}: {e}", path.display())))
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let text = serde_json::to_string_pretty(value).map_err(|e| io_err(path, e))?;
    std::fs::write(path, text).map_err(|e| io_err(path, e))
}

/// `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| io_err(path, e))
}

#[derive(Debug, Serialize, Deserialize)]
struct StepperRecord {
    stepper: i64,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn load_stepper(&self) -> Result<Option<i64>> {
        Ok(read_json::<StepperRecord>(&self.path("stepper.json"))?.map(|r| r.stepper))
    }

    pub fn save_stepper(&self, stepper: i64) -> Result<()> {
        write_json(&self.path("stepper.json"), &StepperRecord { stepper })
    }

    pub fn load_disabled(&self) -> Result<Option<Vec<bool>>> {
        read_json(&self.path("disabled.json"))
    }

    pub fn save_disabled(&self, flags: &[bool]) -> Result<()> {
        write_json(&self.path("disabled.json"), flags)
    }

    pub fn load_intensities(&self) -> Result<Option<Vec<u32>>> {
        read_json(&self.path("intensities.json"))
    }

    pub fn save_intensities(&self, levels: &[u32]) -> Result<()> {
        write_json(&self.path("intensities.json"), levels)
    }

    pub fn load_history(&self) -> Result<Option<HistorySnapshot>> {
        read_json(&self.path("history.json"))
    }

    pub fn save_history(&self, snap: &HistorySnapshot) -> Result<()> {
        write_json(&self.path("history.json"), snap)
    }

    pub fn load_schedules(&self) -> Result<Option<Vec<ScheduleProgress>>> {
        read_json(&self.path("schedules.json"))
    }

    pub fn save_schedules(&self, progress: &[ScheduleProgress]) -> Result<()> {
        write_json(&self.path("schedules.json"), progress)
    }

    fn offset_cache_path(&self) -> PathBuf {
        self.path(".offset_cache.json")
    }

    pub fn load_offset_cache(&self) -> Result<Option<OffsetCache>> {
        read_json(&self.offset_cache_path())
    }

    pub fn save_offset_cache(&self, cache: &OffsetCache) -> Result<()> {
        write_json(&self.offset_cache_path(), cache)
    }

    pub fn clear_offset_cache(&self) -> Result<()> {
        let p = self.offset_cache_path();
        match std::fs::remove_file(&p) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&p, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stepper_record_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested/rig"));
        assert_eq!(store.load_stepper().unwrap(), None);
        store.save_stepper(-340).unwrap();
        let raw = std::fs::read_to_string(store.path("stepper.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v, serde_json::json!({ "stepper": -340 }));
        assert_eq!(store.load_stepper().unwrap(), Some(-340));
    }

    #[test]
    fn flat_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save_disabled(&[false, true]).unwrap();
        store.save_intensities(&[0, 3]).unwrap();
        let raw = std::fs::read_to_string(store.path("intensities.json")).unwrap();
        let v: Vec<u32> = serde_json::from_str(&raw).unwrap();
        assert_eq!(v, vec![0, 3]);
        assert_eq!(store.load_disabled().unwrap(), Some(vec![false, true]));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        std::fs::write(store.path("intensities.json"), "not json").unwrap();
        assert!(store.load_intensities().is_err());
    }

    #[test]
    fn offset_cache_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.clear_offset_cache().unwrap();
        let cache = OffsetCache {
            offsets: vec![1.0],
            offsets_error: vec![0.1],
        };
        store.save_offset_cache(&cache).unwrap();
        assert_eq!(store.load_offset_cache().unwrap().unwrap().offsets, vec![1.0]);
        store.clear_offset_cache().unwrap();
        assert!(store.load_offset_cache().unwrap().is_none());
    }
}
