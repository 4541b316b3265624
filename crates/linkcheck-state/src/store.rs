//! StateStore — redb-backed state persistence for linkcheck.
//!
//! Provides typed operations over jobs, sub-jobs, settings, and the shared
//! key. All values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Outcome of a fan-in decrement.
#[derive(Debug, Clone, PartialEq)]
pub struct FanIn {
    /// The job as persisted after the decrement.
    pub job: Job,
    /// Whether this decrement is the one that completed the job.
    pub completed_now: bool,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(SUB_JOBS).map_err(map_err!(Table))?;
        txn.open_table(SETTINGS).map_err(map_err!(Table))?;
        txn.open_table(SHARED_KEYS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Persist a job together with all of its sub-jobs in one write
    /// transaction. Either everything is stored or nothing is.
    pub fn put_job_with_sub_jobs(&self, job: &Job, sub_jobs: &[SubJob]) -> StateResult<()> {
        let job_key = job.table_key();
        let job_value = encode(job)?;
        let sub_values = sub_jobs
            .iter()
            .map(|s| Ok((s.table_key(), encode(s)?)))
            .collect::<StateResult<Vec<_>>>()?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut subs = txn.open_table(SUB_JOBS).map_err(map_err!(Table))?;
            for (key, value) in &sub_values {
                subs.insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            let mut jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            jobs.insert(job_key.as_str(), job_value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %job_key, sub_jobs = sub_jobs.len(), "job stored");
        Ok(())
    }

    /// Get a job by owner and ID.
    pub fn get_job(&self, owner_id: &str, job_id: &str) -> StateResult<Option<Job>> {
        let key = job_key(owner_id, job_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all jobs belonging to an owner (by key prefix scan).
    pub fn list_jobs(&self, owner_id: &str) -> StateResult<Vec<Job>> {
        let prefix = format!("{owner_id}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// List jobs of every owner created strictly before `cutoff` (Unix seconds).
    pub fn list_jobs_created_before(&self, cutoff: u64) -> StateResult<Vec<Job>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let job: Job = decode(value.value())?;
            if job.created_at < cutoff {
                results.push(job);
            }
        }
        Ok(results)
    }

    /// List jobs of every owner that are still waiting on sub-jobs.
    pub fn list_processing_jobs(&self) -> StateResult<Vec<Job>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let job: Job = decode(value.value())?;
            if !job.is_complete() {
                results.push(job);
            }
        }
        Ok(results)
    }

    /// Delete a job and all of its sub-jobs. Returns true if the job existed.
    pub fn delete_job(&self, owner_id: &str, job_id: &str) -> StateResult<bool> {
        let key = job_key(owner_id, job_id);
        let sub_prefix = format!("{key}/");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        let sub_count;
        {
            let mut jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            existed = jobs.remove(key.as_str()).map_err(map_err!(Write))?.is_some();

            let mut subs = txn.open_table(SUB_JOBS).map_err(map_err!(Table))?;
            // Collect keys first; the table cannot be mutated while a range is open.
            let mut sub_keys = Vec::new();
            for entry in subs.range(sub_prefix.as_str()..).map_err(map_err!(Read))? {
                let (k, _) = entry.map_err(map_err!(Read))?;
                let k = k.value();
                if !k.starts_with(&sub_prefix) {
                    break;
                }
                sub_keys.push(k.to_string());
            }
            for k in &sub_keys {
                subs.remove(k.as_str()).map_err(map_err!(Write))?;
            }
            sub_count = sub_keys.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, sub_jobs = sub_count, "job deleted");
        Ok(existed)
    }

    /// Record one finished sub-job against its parent job.
    ///
    /// Runs as a single read-modify-write transaction: load the job,
    /// decrement `remaining` (floored at zero), flip to complete at zero,
    /// persist. Concurrent callers are serialized by redb's single writer.
    pub fn complete_one(&self, owner_id: &str, job_id: &str) -> StateResult<FanIn> {
        let key = job_key(owner_id, job_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let fan_in = {
            let mut jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            // Returning drops the uncommitted transaction, which aborts it.
            decrement_job(&mut jobs, &key)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, remaining = fan_in.job.remaining, "sub-job completion recorded");
        Ok(fan_in)
    }

    /// Save a finished sub-job and count it against its parent job in one
    /// write transaction.
    ///
    /// Either both the final records and the decrement are stored or
    /// neither is, so a crash can never leave a classified sub-job that
    /// its job is still waiting on. A missing parent job is `NotFound` and
    /// nothing is written.
    pub fn finish_sub_job(&self, sub_job: &SubJob) -> StateResult<FanIn> {
        let parent = job_key(&sub_job.owner_id, &sub_job.job_id);
        let key = sub_job.table_key();
        let value = encode(sub_job)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let fan_in = {
            let mut jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let fan_in = decrement_job(&mut jobs, &parent)?;
            let mut subs = txn.open_table(SUB_JOBS).map_err(map_err!(Table))?;
            subs.insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            fan_in
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, remaining = fan_in.job.remaining, "sub-job finished and counted");
        Ok(fan_in)
    }

    // ── Sub-jobs ───────────────────────────────────────────────────

    /// Get a sub-job by its owner, parent job, and ID.
    pub fn get_sub_job(
        &self,
        owner_id: &str,
        job_id: &str,
        sub_job_id: &str,
    ) -> StateResult<Option<SubJob>> {
        let key = sub_job_key(owner_id, job_id, sub_job_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SUB_JOBS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Load the sub-jobs of a job in the order given, from one snapshot.
    ///
    /// A referenced sub-job that is missing is reported as `NotFound`.
    pub fn get_sub_jobs(
        &self,
        owner_id: &str,
        job_id: &str,
        sub_job_ids: &[SubJobId],
    ) -> StateResult<Vec<SubJob>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SUB_JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::with_capacity(sub_job_ids.len());
        for id in sub_job_ids {
            let key = sub_job_key(owner_id, job_id, id);
            let guard = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .ok_or_else(|| StateError::NotFound(key.clone()))?;
            results.push(decode(guard.value())?);
        }
        Ok(results)
    }

    /// Save a sub-job's progress.
    ///
    /// The write only happens while the parent job still exists, so a
    /// worker finishing after its job was deleted cannot resurrect it.
    pub fn put_sub_job(&self, sub_job: &SubJob) -> StateResult<()> {
        let parent = job_key(&sub_job.owner_id, &sub_job.job_id);
        let key = sub_job.table_key();
        let value = encode(sub_job)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            if jobs.get(parent.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::NotFound(parent));
            }
            let mut subs = txn.open_table(SUB_JOBS).map_err(map_err!(Table))?;
            subs.insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, pending = sub_job.pending_count(), "sub-job stored");
        Ok(())
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Get the stored settings, if they were ever written.
    pub fn get_settings(&self) -> StateResult<Option<Settings>> {
        self.get_singleton(SETTINGS, SETTINGS_KEY)
    }

    /// Replace the stored settings.
    pub fn put_settings(&self, settings: &Settings) -> StateResult<()> {
        self.put_singleton(SETTINGS, SETTINGS_KEY, settings)
    }

    /// Get the stored settings, writing the defaults if there are none.
    ///
    /// The second value is true when this call stored the defaults.
    pub fn settings_or_default(&self) -> StateResult<(Settings, bool)> {
        if let Some(settings) = self.get_settings()? {
            return Ok((settings, false));
        }
        // Re-check under the writer so a concurrent update is not overwritten.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = {
            let mut table = txn.open_table(SETTINGS).map_err(map_err!(Table))?;
            let current = table
                .get(SETTINGS_KEY)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            match current {
                Some(bytes) => (decode(&bytes)?, false),
                None => {
                    let settings = Settings::default();
                    let value = encode(&settings)?;
                    table
                        .insert(SETTINGS_KEY, value.as_slice())
                        .map_err(map_err!(Write))?;
                    (settings, true)
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(result)
    }

    /// Merge a partial update into the stored settings (or the defaults)
    /// in one write transaction, so concurrent patches of different fields
    /// are all kept.
    pub fn merge_settings(&self, patch: &SettingsPatch) -> StateResult<Settings> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let settings = {
            let mut table = txn.open_table(SETTINGS).map_err(map_err!(Table))?;
            let current = table
                .get(SETTINGS_KEY)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let mut settings = match current {
                Some(bytes) => decode(&bytes)?,
                None => Settings::default(),
            };
            settings.merge(patch);
            let value = encode(&settings)?;
            table
                .insert(SETTINGS_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
            settings
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(rate_per_minute = settings.rate_per_minute, "settings merged");
        Ok(settings)
    }

    // ── Shared key ─────────────────────────────────────────────────

    /// Get the stored shared key, if one was ever written.
    pub fn get_shared_key(&self) -> StateResult<Option<SharedKey>> {
        self.get_singleton(SHARED_KEYS, SHARED_KEY_KEY)
    }

    /// Replace the stored shared key.
    pub fn put_shared_key(&self, key: &SharedKey) -> StateResult<()> {
        self.put_singleton(SHARED_KEYS, SHARED_KEY_KEY, key)
    }

    fn get_singleton<T: DeserializeOwned>(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn put_singleton<T: Serialize>(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "singleton stored");
        Ok(())
    }
}

/// Decrement a job's `remaining` counter inside an open write transaction.
fn decrement_job(
    jobs: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
) -> StateResult<FanIn> {
    let current = jobs
        .get(key)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_vec());
    let Some(bytes) = current else {
        return Err(StateError::NotFound(key.to_string()));
    };
    let mut job: Job = decode(&bytes)?;
    let completed_now = job.complete_one();
    let value = encode(&job)?;
    jobs.insert(key, value.as_slice()).map_err(map_err!(Write))?;
    Ok(FanIn { job, completed_now })
}
