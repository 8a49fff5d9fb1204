//! Tolerant employee id matching.
//!
//! Ids are typed by hand on shared terminals, so leading zeros are often
//! dropped or added and sometimes only part of the id is entered. Rules are
//! tried in order and the first hit wins:
//!
//! 1. exact match on the trimmed input
//! 2. input with all leading `0` removed
//! 3. input left padded with `0` to 4, 5, 6 and 7 characters
//! 4. substring match in either direction, scanning ids in directory order
//!
//! Rule 4 can produce false positives and may be disabled through
//! [`MatchPolicy::substring_fallback`].

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, instrument};

use crate::{
    cache::{CacheTier, FreshnessOracle, FsFreshness, TieredCache},
    error::{LookupError, ValidationError},
    record::{Directory, EmployeeRecord},
};

const PAD_WIDTHS: [usize; 4] = [4, 5, 6, 7];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Reject input shorter than this many characters before any lookup.
    pub min_id_len: Option<usize>,
    pub substring_fallback: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            min_id_len: None,
            substring_fallback: true,
        }
    }
}

impl MatchPolicy {
    pub fn check(&self, raw_id: &str) -> Result<(), ValidationError> {
        let Some(min) = self.min_id_len else {
            return Ok(());
        };
        let actual = raw_id.trim().chars().count();
        if actual < min {
            return Err(ValidationError::TooShort { min, actual });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    Exact,
    ZeroStripped,
    ZeroPadded(usize),
    Substring,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    Found {
        record: &'a EmployeeRecord,
        rule: MatchRule,
    },
    NotFound,
}

impl<'a> Resolution<'a> {
    pub fn record(&self) -> Option<&'a EmployeeRecord> {
        match self {
            Resolution::Found { record, .. } => Some(*record),
            Resolution::NotFound => None,
        }
    }
}

/// Resolve a user typed id against `directory`.
pub fn resolve<'a>(
    raw_id: &str,
    directory: &'a Directory,
    policy: &MatchPolicy,
) -> Result<Resolution<'a>, ValidationError> {
    policy.check(raw_id)?;
    let id = raw_id.trim();
    if id.is_empty() {
        return Ok(Resolution::NotFound);
    }
    if let Some(record) = directory.get(id) {
        return found(record, MatchRule::Exact);
    }

    let stripped = id.trim_start_matches('0');
    if !stripped.is_empty() && stripped.len() != id.len() {
        if let Some(record) = directory.get(stripped) {
            return found(record, MatchRule::ZeroStripped);
        }
    }

    let width = id.chars().count();
    for pad in PAD_WIDTHS.into_iter().filter(|pad| *pad > width) {
        if let Some(record) = directory.get(&format!("{id:0>pad$}")) {
            return found(record, MatchRule::ZeroPadded(pad));
        }
    }

    if policy.substring_fallback {
        if let Some((_, record)) = directory
            .iter()
            .find(|(key, _)| key.contains(id) || id.contains(key))
        {
            return found(record, MatchRule::Substring);
        }
    }

    Ok(Resolution::NotFound)
}

fn found(record: &EmployeeRecord, rule: MatchRule) -> Result<Resolution<'_>, ValidationError> {
    Ok(Resolution::Found { record, rule })
}

/// A successful match, detached from the directory it came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Found {
    pub record: EmployeeRecord,
    pub rule: MatchRule,
}

/// Outcome of [`Resolver::lookup`] together with timing details.
#[derive(Clone, Debug)]
pub struct Lookup {
    pub found: Option<Found>,
    pub tier: CacheTier,
    pub directory_size: usize,
    pub load_time: Duration,
    pub search_time: Duration,
}

/// Cache plus matching policy; the entry point used by request handlers.
pub struct Resolver<F = FsFreshness> {
    cache: TieredCache<F>,
    policy: MatchPolicy,
}

impl<F: FreshnessOracle> Resolver<F> {
    pub fn new(cache: TieredCache<F>, policy: MatchPolicy) -> Self {
        Self { cache, policy }
    }

    pub fn cache(&self) -> &TieredCache<F> {
        &self.cache
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    #[instrument(name = "directory.lookup", skip(self))]
    pub fn lookup(&self, raw_id: &str) -> Result<Lookup, LookupError> {
        // gate first so short input never touches the directory
        self.policy.check(raw_id)?;

        let load_start = Instant::now();
        let (directory, tier) = self.cache.get_traced()?;
        let load_time = load_start.elapsed();

        let search_start = Instant::now();
        let found = match resolve(raw_id, &directory, &self.policy)? {
            Resolution::Found { record, rule } => Some(Found {
                record: record.clone(),
                rule,
            }),
            Resolution::NotFound => None,
        };
        let search_time = search_start.elapsed();

        debug!(
            tier = tier.as_str(),
            rule = ?found.as_ref().map(|found| found.rule),
            "employee lookup finished"
        );
        Ok(Lookup {
            found,
            tier,
            directory_size: directory.len(),
            load_time,
            search_time,
        })
    }
}
