//! Employee directory used by the registration desk.
//!
//! The directory is parsed from a CSV export ([`loader`]), held in a two tier
//! cache with a persisted JSON snapshot ([`cache`]) and queried with a
//! tolerant id matching policy ([`resolver`]).

pub mod cache;
pub mod error;
pub mod loader;
pub mod record;
pub mod resolver;

pub use cache::{CacheConfig, CacheStats, CacheTier, FreshnessOracle, FsFreshness, TieredCache};
pub use error::{DirectoryError, LookupError, ValidationError};
pub use loader::load;
pub use record::{Directory, EmployeeRecord};
pub use resolver::{Found, Lookup, MatchPolicy, MatchRule, Resolution, Resolver, resolve};
