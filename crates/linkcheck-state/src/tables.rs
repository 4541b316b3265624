//! redb table definitions for the linkcheck state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Composite keys follow the pattern `{owner}/{job_id}` or
//! `{owner}/{job_id}/{sub_job_id}`.

use redb::TableDefinition;

/// Jobs keyed by `{owner}/{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Sub-jobs keyed by `{owner}/{job_id}/{sub_job_id}`.
pub const SUB_JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("sub_jobs");

/// Singleton settings record under [`SETTINGS_KEY`].
pub const SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");

/// Singleton shared API key under [`SHARED_KEY_KEY`].
pub const SHARED_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("shared_keys");

pub const SETTINGS_KEY: &str = "settings";
pub const SHARED_KEY_KEY: &str = "key";
