use std::{fmt::Write as _, fs, thread};

use anyhow::Result;
use products_directory::{
    CacheConfig, CacheTier, DirectoryError, MatchPolicy, MatchRule, Resolver, TieredCache,
};
use serde_json::Value;
use suite_tests::{Fixture, at};

const ROWS: &str = "001234,Somchai,Officer,HR,Head Office\n002000,Suda,Analyst,IT,Systems\n";

#[test]
fn restart_serves_snapshot_until_source_changes() -> Result<()> {
    let fx = Fixture::new()?;
    fx.write_source(ROWS, at(0))?;

    let (built, tier) = TieredCache::new(fx.cache_config()).get_traced()?;
    assert_eq!(tier, CacheTier::Source);
    assert!(fx.snapshot.is_file());

    // a fresh cache stands in for a restarted worker
    let restarted = TieredCache::new(fx.cache_config());
    let (reloaded, tier) = restarted.get_traced()?;
    assert_eq!(tier, CacheTier::Snapshot);
    assert_eq!(*reloaded, *built);
    assert_eq!(restarted.get_traced()?.1, CacheTier::Memory);

    fx.write_source(&format!("{ROWS}003000,Niran,Driver,GA,Facilities\n"), at(60))?;
    let (rebuilt, tier) = TieredCache::new(fx.cache_config()).get_traced()?;
    assert_eq!(tier, CacheTier::Source);
    assert_eq!(rebuilt.len(), 3);
    assert_eq!(rebuilt.get("003000").map(|r| r.name.as_str()), Some("Niran"));
    Ok(())
}

#[test]
fn rebuilding_an_unchanged_source_is_repeatable() -> Result<()> {
    let fx = Fixture::new()?;
    fx.write_source(ROWS, at(0))?;

    let cache = TieredCache::new(fx.cache_config());
    let first = cache.get()?;
    let first_snapshot = fs::read_to_string(&fx.snapshot)?;

    cache.clear()?;
    assert!(!fx.snapshot.exists());
    let (second, tier) = cache.get_traced()?;
    assert_eq!(tier, CacheTier::Source);
    assert_eq!(*first, *second);
    assert_eq!(fs::read_to_string(&fx.snapshot)?, first_snapshot);

    let snapshot: Value = serde_json::from_str(&first_snapshot)?;
    assert_eq!(snapshot["version"], 1);
    assert_eq!(snapshot["records"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[test]
fn running_cache_sees_edits_only_when_revalidating() -> Result<()> {
    let fx = Fixture::new()?;
    fx.write_source(ROWS, at(0))?;

    let plain = TieredCache::new(fx.cache_config());
    let revalidating = TieredCache::new(fx.cache_config().revalidate_memory(true));
    plain.get()?;
    revalidating.get()?;

    fx.write_source("001234,Somchai Jaidee,Senior Officer,HR,Head Office\n", at(120))?;

    let (stale, tier) = plain.get_traced()?;
    assert_eq!(tier, CacheTier::Memory);
    assert_eq!(stale.len(), 2);

    let (fresh, tier) = revalidating.get_traced()?;
    assert_eq!(tier, CacheTier::Source);
    assert_eq!(fresh.len(), 1);
    assert_eq!(
        fresh.get("001234").map(|r| r.name.as_str()),
        Some("Somchai Jaidee")
    );
    Ok(())
}

#[test]
fn corrupt_snapshot_is_rebuilt_and_overwritten() -> Result<()> {
    let fx = Fixture::new()?;
    fx.write_source(ROWS, at(0))?;
    fs::create_dir_all(fx.snapshot.parent().unwrap())?;
    fs::write(&fx.snapshot, "{\"version\": 1, \"records\": [trunc")?;

    let (directory, tier) = TieredCache::new(fx.cache_config()).get_traced()?;
    assert_eq!(tier, CacheTier::Source);
    assert_eq!(directory.len(), 2);

    let repaired: Value = serde_json::from_str(&fs::read_to_string(&fx.snapshot)?)?;
    assert_eq!(repaired["records"][0]["id"], "001234");
    Ok(())
}

#[test]
fn missing_source_falls_back_to_snapshot() -> Result<()> {
    let fx = Fixture::new()?;
    fx.write_source(ROWS, at(0))?;
    TieredCache::new(fx.cache_config()).get()?;
    fs::remove_file(&fx.source)?;

    let cache = TieredCache::new(fx.cache_config());
    let (directory, tier) = cache.get_traced()?;
    assert_eq!(tier, CacheTier::Snapshot);
    assert_eq!(directory.len(), 2);

    cache.clear()?;
    let err = cache.get().unwrap_err();
    assert!(matches!(err, DirectoryError::SourceUnavailable { .. }));
    assert_eq!(cache.stats().failures, 1);
    Ok(())
}

#[test]
fn unwritable_snapshot_location_still_serves_lookups() -> Result<()> {
    let fx = Fixture::new()?;
    fx.write_source(ROWS, at(0))?;
    let blocker = fx.source.with_file_name("not-a-dir");
    fs::write(&blocker, "")?;

    let cache = TieredCache::new(CacheConfig::new(&fx.source, blocker.join("snapshot.json")));
    let (directory, tier) = cache.get_traced()?;
    assert_eq!(tier, CacheTier::Source);
    assert_eq!(directory.len(), 2);
    assert!(!cache.stats().snapshot_present);
    Ok(())
}

#[test]
fn resolver_matches_against_files_on_disk() -> Result<()> {
    let fx = Fixture::new()?;
    fx.write_source(ROWS, at(0))?;
    let resolver = Resolver::new(TieredCache::new(fx.cache_config()), MatchPolicy::default());

    let padded = resolver.lookup("1234")?;
    let found = padded.found.expect("1234 resolves");
    assert_eq!(found.record.name, "Somchai");
    assert_eq!(found.rule, MatchRule::ZeroPadded(6));
    assert_eq!(padded.tier, CacheTier::Source);

    assert!(resolver.lookup("999999")?.found.is_none());

    let strict = Resolver::new(
        TieredCache::new(fx.cache_config()),
        MatchPolicy {
            min_id_len: Some(6),
            substring_fallback: false,
        },
    );
    assert!(strict.lookup("1234").is_err());
    let exact = strict.lookup("002000")?;
    assert_eq!(exact.tier, CacheTier::Snapshot);
    assert_eq!(exact.found.map(|found| found.rule), Some(MatchRule::Exact));
    Ok(())
}

#[test]
fn concurrent_rebuilds_leave_one_complete_snapshot() -> Result<()> {
    const EMPLOYEES: usize = 20_000;
    const WORKERS: usize = 8;
    const ROUNDS: u64 = 5;

    let fx = Fixture::new()?;
    let mut rows = String::new();
    for n in 1..=EMPLOYEES {
        writeln!(rows, "{n:06},Employee {n},Clerk,OPS,Operations")?;
    }

    for round in 0..ROUNDS {
        // every round starts from a source newer than whatever snapshot exists
        fx.write_source(&rows, at(round * 60))?;
        let shared = TieredCache::new(fx.cache_config());
        thread::scope(|scope| {
            let workers: Vec<_> = (0..WORKERS)
                .map(|_| {
                    scope.spawn(|| {
                        let own = TieredCache::new(fx.cache_config()).get()?;
                        let common = shared.get()?;
                        Ok::<_, DirectoryError>((own.len(), common.len()))
                    })
                })
                .collect();
            for worker in workers {
                let sizes = worker.join().expect("worker panicked")?;
                assert_eq!(sizes, (EMPLOYEES, EMPLOYEES));
            }
            Ok::<_, DirectoryError>(())
        })?;
    }

    let (directory, tier) = TieredCache::new(fx.cache_config()).get_traced()?;
    assert_eq!(tier, CacheTier::Snapshot);
    assert_eq!(directory.len(), EMPLOYEES);
    assert_eq!(
        directory.get("020000").map(|r| r.name.as_str()),
        Some("Employee 20000")
    );

    let snapshot_dir = fx.snapshot.parent().expect("snapshot has a parent");
    let leftovers: Vec<_> = fs::read_dir(snapshot_dir)?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<Result<_, _>>()?;
    assert_eq!(leftovers, vec![fx.snapshot.file_name().unwrap().to_owned()]);
    Ok(())
}
