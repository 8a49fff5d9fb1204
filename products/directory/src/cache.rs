//! Two tier directory cache.
//!
//! Lookups are served from memory when possible, then from a JSON snapshot
//! persisted next to the source, and only then by reparsing the CSV. The
//! snapshot records the source modification time it was built from and is
//! ignored once the source is newer.

use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::DirectoryError,
    loader,
    record::{Directory, EmployeeRecord},
};

const SNAPSHOT_VERSION: u32 = 1;

/// Source of modification times for the directory file.
pub trait FreshnessOracle: Send + Sync {
    /// Modification time of `path`, or `None` when it does not exist.
    fn modified(&self, path: &Path) -> io::Result<Option<SystemTime>>;
}

/// Reads modification times from the filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsFreshness;

impl FreshnessOracle for FsFreshness {
    fn modified(&self, path: &Path) -> io::Result<Option<SystemTime>> {
        match fs::metadata(path) {
            Ok(meta) => meta.modified().map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub source: PathBuf,
    pub snapshot: PathBuf,
    /// Re-check the source mtime on every memory hit.
    pub revalidate_memory: bool,
}

impl CacheConfig {
    pub fn new(source: impl Into<PathBuf>, snapshot: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            snapshot: snapshot.into(),
            revalidate_memory: false,
        }
    }

    pub fn revalidate_memory(mut self, enabled: bool) -> Self {
        self.revalidate_memory = enabled;
        self
    }
}

/// Which tier answered a [`TieredCache::get_traced`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Memory,
    Snapshot,
    Source,
}

impl CacheTier {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Snapshot => "snapshot",
            CacheTier::Source => "source",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub snapshot_hits: u64,
    pub rebuilds: u64,
    pub failures: u64,
    /// Record count of the memory tier, `None` while it is empty.
    pub records: Option<usize>,
    pub snapshot_present: bool,
}

#[derive(Debug, Error)]
enum SnapshotError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    Version(u32),
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    source_modified_ms: u64,
    records: Vec<EmployeeRecord>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    source_modified_ms: u64,
    records: Vec<&'a EmployeeRecord>,
}

struct MemoryEntry {
    directory: Arc<Directory>,
    source_modified_ms: Option<u64>,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    snapshot_hits: AtomicU64,
    rebuilds: AtomicU64,
    failures: AtomicU64,
}

/// Owned, injectable directory cache. One instance per process.
pub struct TieredCache<F = FsFreshness> {
    config: CacheConfig,
    oracle: F,
    memory: RwLock<Option<MemoryEntry>>,
    counters: Counters,
}

impl TieredCache<FsFreshness> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_oracle(config, FsFreshness)
    }
}

impl<F: FreshnessOracle> TieredCache<F> {
    pub fn with_oracle(config: CacheConfig, oracle: F) -> Self {
        Self {
            config,
            oracle,
            memory: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn get(&self) -> Result<Arc<Directory>, DirectoryError> {
        self.get_traced().map(|(directory, _)| directory)
    }

    /// Like [`get`](Self::get) but also reports the tier that answered.
    #[instrument(name = "directory.cache.get", skip_all, fields(source = %self.config.source.display()))]
    pub fn get_traced(&self) -> Result<(Arc<Directory>, CacheTier), DirectoryError> {
        if let Some(directory) = self.memory_hit() {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Ok((directory, CacheTier::Memory));
        }

        let source_modified_ms = self.source_modified_ms()?;
        match self.read_snapshot(source_modified_ms) {
            Ok(Some(directory)) => {
                let directory = Arc::new(directory);
                self.store_memory(directory.clone(), source_modified_ms);
                self.counters.snapshot_hits.fetch_add(1, Ordering::Relaxed);
                debug!(records = directory.len(), "directory served from snapshot");
                return Ok((directory, CacheTier::Snapshot));
            }
            Ok(None) => {}
            Err(err) => warn!(
                snapshot = %self.config.snapshot.display(),
                error = %err,
                "discarding unreadable directory snapshot"
            ),
        }

        self.rebuild(source_modified_ms)
            .map(|directory| (directory, CacheTier::Source))
    }

    /// Drop the memory tier. The snapshot is left in place.
    pub fn invalidate(&self) {
        *self.memory.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Drop the memory tier and delete the persisted snapshot.
    pub fn clear(&self) -> io::Result<()> {
        self.invalidate();
        match fs::remove_file(&self.config.snapshot) {
            Ok(()) => {
                info!(snapshot = %self.config.snapshot.display(), "directory snapshot removed");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let records = self
            .memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|entry| entry.directory.len());
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            snapshot_hits: self.counters.snapshot_hits.load(Ordering::Relaxed),
            rebuilds: self.counters.rebuilds.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            records,
            snapshot_present: self.config.snapshot.is_file(),
        }
    }

    fn memory_hit(&self) -> Option<Arc<Directory>> {
        let guard = self.memory.read().unwrap_or_else(PoisonError::into_inner);
        let entry = guard.as_ref()?;
        if self.config.revalidate_memory {
            let current = self
                .oracle
                .modified(&self.config.source)
                .ok()
                .flatten()
                .map(millis);
            if let (Some(current), Some(built)) = (current, entry.source_modified_ms) {
                if current > built {
                    debug!("directory source changed; memory tier is stale");
                    return None;
                }
            }
        }
        Some(entry.directory.clone())
    }

    fn source_modified_ms(&self) -> Result<Option<u64>, DirectoryError> {
        self.oracle
            .modified(&self.config.source)
            .map(|time| time.map(millis))
            .map_err(|source| {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                DirectoryError::SourceUnavailable {
                    path: self.config.source.clone(),
                    source,
                }
            })
    }

    fn read_snapshot(&self, source_modified_ms: Option<u64>) -> Result<Option<Directory>, SnapshotError> {
        let bytes = match fs::read(&self.config.snapshot) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version(snapshot.version));
        }
        match source_modified_ms {
            Some(current) if snapshot.source_modified_ms < current => {
                debug!(
                    snapshot_ms = snapshot.source_modified_ms,
                    source_ms = current,
                    "directory snapshot is older than its source"
                );
                Ok(None)
            }
            Some(_) => Ok(Some(Directory::from_records(snapshot.records))),
            None => {
                warn!(
                    source = %self.config.source.display(),
                    "directory source missing; serving persisted snapshot"
                );
                Ok(Some(Directory::from_records(snapshot.records)))
            }
        }
    }

    fn rebuild(&self, source_modified_ms: Option<u64>) -> Result<Arc<Directory>, DirectoryError> {
        let directory = match loader::load(&self.config.source) {
            Ok(directory) => Arc::new(directory),
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };
        self.counters.rebuilds.fetch_add(1, Ordering::Relaxed);
        info!(records = directory.len(), "directory rebuilt from source");

        if let Err(err) = self.write_snapshot(&directory, source_modified_ms.unwrap_or_default()) {
            warn!(
                snapshot = %self.config.snapshot.display(),
                error = %err,
                "failed to persist directory snapshot"
            );
        }
        self.store_memory(directory.clone(), source_modified_ms);
        Ok(directory)
    }

    fn write_snapshot(&self, directory: &Directory, source_modified_ms: u64) -> Result<(), SnapshotError> {
        let target = &self.config.snapshot;
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            source_modified_ms,
            records: directory.records().collect(),
        };
        // Written beside the target so the rename stays on one filesystem.
        let mut file = NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            serde_json::to_writer(&mut writer, &snapshot)?;
            writer.flush()?;
        }
        file.as_file().sync_all()?;
        file.persist(target).map_err(|err| err.error)?;
        Ok(())
    }

    fn store_memory(&self, directory: Arc<Directory>, source_modified_ms: Option<u64>) {
        *self.memory.write().unwrap_or_else(PoisonError::into_inner) = Some(MemoryEntry {
            directory,
            source_modified_ms,
        });
    }
}

fn millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use tempfile::TempDir;

    use super::*;

    const SOURCE: &str = "emp_id,emp_name,position,sec_short,cc_name\n\
                          001234,Somchai,Officer,HR,Head Office\n\
                          000777,Malee,Engineer,IT,Systems\n";

    /// Freshness oracle with a manually controlled clock.
    #[derive(Clone, Default)]
    struct FakeClock {
        modified: Arc<Mutex<Option<SystemTime>>>,
    }

    impl FakeClock {
        fn at(secs: u64) -> Self {
            let clock = Self::default();
            clock.set(Some(secs));
            clock
        }

        fn set(&self, secs: Option<u64>) {
            *self.modified.lock().unwrap() = secs.map(|s| UNIX_EPOCH + Duration::from_secs(s));
        }
    }

    impl FreshnessOracle for FakeClock {
        fn modified(&self, _path: &Path) -> io::Result<Option<SystemTime>> {
            Ok(*self.modified.lock().unwrap())
        }
    }

    struct Fixture {
        dir: TempDir,
        config: CacheConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let source = dir.path().join("employee.csv");
            fs::write(&source, SOURCE).unwrap();
            let config = CacheConfig::new(source, dir.path().join("cache").join("employee_cache.json"));
            Self { dir, config }
        }

        fn cache(&self, clock: &FakeClock) -> TieredCache<FakeClock> {
            TieredCache::with_oracle(self.config.clone(), clock.clone())
        }
    }

    #[test]
    fn tiers_are_consulted_in_order() {
        let fixture = Fixture::new();
        let clock = FakeClock::at(1_000);

        let cache = fixture.cache(&clock);
        let (directory, tier) = cache.get_traced().unwrap();
        assert_eq!(tier, CacheTier::Source);
        assert_eq!(directory.len(), 2);
        assert_eq!(cache.get_traced().unwrap().1, CacheTier::Memory);

        // fresh process: memory empty, snapshot still valid
        let restarted = fixture.cache(&clock);
        let (reloaded, tier) = restarted.get_traced().unwrap();
        assert_eq!(tier, CacheTier::Snapshot);
        assert_eq!(*reloaded, *directory);
        assert_eq!(restarted.get_traced().unwrap().1, CacheTier::Memory);

        let stats = restarted.stats();
        assert_eq!(stats.snapshot_hits, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.rebuilds, 0);
        assert_eq!(stats.records, Some(2));
        assert!(stats.snapshot_present);
    }

    #[test]
    fn newer_source_forces_rebuild() {
        let fixture = Fixture::new();
        let clock = FakeClock::at(1_000);
        fixture.cache(&clock).get().unwrap();

        fs::write(&fixture.config.source, format!("{SOURCE}000999,Niran,Driver,GA,Fleet\n")).unwrap();
        clock.set(Some(2_000));

        let restarted = fixture.cache(&clock);
        let (directory, tier) = restarted.get_traced().unwrap();
        assert_eq!(tier, CacheTier::Source);
        assert_eq!(directory.len(), 3);
    }

    #[test]
    fn snapshot_with_equal_mtime_is_reused() {
        let fixture = Fixture::new();
        let clock = FakeClock::at(1_000);
        fixture.cache(&clock).get().unwrap();
        // mtime unchanged, so the snapshot still wins over the edited source
        fs::write(&fixture.config.source, "emp_id,emp_name\n1,Only\n").unwrap();
        let (directory, tier) = fixture.cache(&clock).get_traced().unwrap();
        assert_eq!(tier, CacheTier::Snapshot);
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn memory_tier_ignores_source_changes_unless_revalidating() {
        let fixture = Fixture::new();
        let clock = FakeClock::at(1_000);
        let cache = fixture.cache(&clock);
        cache.get().unwrap();
        clock.set(Some(5_000));
        assert_eq!(cache.get_traced().unwrap().1, CacheTier::Memory);

        let revalidating = TieredCache::with_oracle(
            fixture.config.clone().revalidate_memory(true),
            clock.clone(),
        );
        revalidating.get().unwrap();
        assert_eq!(revalidating.get_traced().unwrap().1, CacheTier::Memory);
        clock.set(Some(9_000));
        assert_eq!(revalidating.get_traced().unwrap().1, CacheTier::Source);
    }

    #[test]
    fn corrupt_snapshot_is_overwritten() {
        let fixture = Fixture::new();
        let clock = FakeClock::at(1_000);
        fs::create_dir_all(fixture.config.snapshot.parent().unwrap()).unwrap();
        fs::write(&fixture.config.snapshot, b"{ not json").unwrap();

        let (_, tier) = fixture.cache(&clock).get_traced().unwrap();
        assert_eq!(tier, CacheTier::Source);
        let (_, tier) = fixture.cache(&clock).get_traced().unwrap();
        assert_eq!(tier, CacheTier::Snapshot);
    }

    #[test]
    fn snapshot_write_failure_is_not_fatal() {
        let fixture = Fixture::new();
        let blocker = fixture.dir.path().join("blocker");
        fs::write(&blocker, b"file, not a directory").unwrap();
        let config = CacheConfig::new(fixture.config.source.clone(), blocker.join("snap.json"));
        let cache = TieredCache::with_oracle(config, FakeClock::at(1_000));

        let (directory, tier) = cache.get_traced().unwrap();
        assert_eq!(tier, CacheTier::Source);
        assert_eq!(directory.len(), 2);
        assert!(!cache.stats().snapshot_present);
    }

    #[test]
    fn failed_rebuild_keeps_previous_memory_tier() {
        let fixture = Fixture::new();
        let clock = FakeClock::at(1_000);
        let cache = TieredCache::with_oracle(
            fixture.config.clone().revalidate_memory(true),
            clock.clone(),
        );
        cache.get().unwrap();

        fs::write(&fixture.config.source, "").unwrap();
        clock.set(Some(2_000));
        let err = cache.get().unwrap_err();
        assert!(matches!(err, DirectoryError::SourceMalformed { .. }));

        let stats = cache.stats();
        assert_eq!(stats.records, Some(2));
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn missing_source_falls_back_to_snapshot() {
        let fixture = Fixture::new();
        let clock = FakeClock::at(1_000);
        fixture.cache(&clock).get().unwrap();

        fs::remove_file(&fixture.config.source).unwrap();
        clock.set(None);
        let (directory, tier) = fixture.cache(&clock).get_traced().unwrap();
        assert_eq!(tier, CacheTier::Snapshot);
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn missing_source_without_snapshot_is_unavailable() {
        let fixture = Fixture::new();
        fs::remove_file(&fixture.config.source).unwrap();
        let clock = FakeClock::default();
        let err = fixture.cache(&clock).get().unwrap_err();
        assert!(matches!(err, DirectoryError::SourceUnavailable { .. }));
    }

    #[test]
    fn rebuilding_unchanged_source_is_byte_identical() {
        let fixture = Fixture::new();
        let clock = FakeClock::at(1_000);
        let cache = fixture.cache(&clock);

        let first = cache.get().unwrap();
        let first_bytes = fs::read(&fixture.config.snapshot).unwrap();
        cache.clear().unwrap();
        assert!(!cache.stats().snapshot_present);

        let (second, tier) = cache.get_traced().unwrap();
        assert_eq!(tier, CacheTier::Source);
        assert_eq!(*first, *second);
        let first_order: Vec<_> = first.iter().map(|(id, _)| id.to_string()).collect();
        let second_order: Vec<_> = second.iter().map(|(id, _)| id.to_string()).collect();
        assert_eq!(first_order, second_order);
        assert_eq!(first_bytes, fs::read(&fixture.config.snapshot).unwrap());
        assert_eq!(cache.stats().rebuilds, 2);
    }

    #[test]
    fn invalidate_keeps_snapshot() {
        let fixture = Fixture::new();
        let clock = FakeClock::at(1_000);
        let cache = fixture.cache(&clock);
        cache.get().unwrap();
        cache.invalidate();
        assert_eq!(cache.stats().records, None);
        assert_eq!(cache.get_traced().unwrap().1, CacheTier::Snapshot);
    }
}
