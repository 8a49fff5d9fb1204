//! Fixtures shared by the integration tests: a scratch directory holding a
//! CSV source and its snapshot, with explicit control over modification times.

use std::{
    fs::{self, File},
    io,
    path::PathBuf,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use products_directory::CacheConfig;
use tempfile::TempDir;

pub const HEADER: &str = "emp_id,emp_name,position,sec_short,cc_name\n";

/// Fixed point in time `secs` seconds after the fixture epoch.
pub fn at(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_750_000_000 + secs)
}

pub struct Fixture {
    _dir: TempDir,
    pub source: PathBuf,
    pub snapshot: PathBuf,
}

impl Fixture {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("employee.csv");
        let snapshot = dir.path().join("cache").join("employee_cache.json");
        Ok(Self {
            _dir: dir,
            source,
            snapshot,
        })
    }

    /// Replace the source with `HEADER` + `rows` and stamp it with `modified`.
    pub fn write_source(&self, rows: &str, modified: SystemTime) -> io::Result<()> {
        fs::write(&self.source, format!("{HEADER}{rows}"))?;
        File::options()
            .write(true)
            .open(&self.source)?
            .set_modified(modified)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(&self.source, &self.snapshot)
    }
}
