//! In-memory job registry shared by request handlers and supervisors.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{Duration, Utc};

use crate::error::StemsplitError;
use crate::state_machine::{JobId, JobRecord};

/// Concurrent map from [`JobId`] to [`JobRecord`].
///
/// Cloning the store clones the handle, not the data. Each `update` runs its
/// mutator under the write lock, so readers always see either the state
/// before or after a whole mutation.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, id: JobId, record: JobRecord) -> Result<(), StemsplitError> {
        let mut jobs = self.write();
        if jobs.contains_key(&id) {
            return Err(StemsplitError::DuplicateJobId(id));
        }
        jobs.insert(id, record);
        Ok(())
    }

    /// Returns a snapshot of the record.
    pub fn get(&self, id: &JobId) -> Result<JobRecord, StemsplitError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| StemsplitError::JobNotFound(id.clone()))
    }

    /// Applies `mutator` to the record in place.
    ///
    /// Only the supervisor that owns `id` is expected to call this.
    pub fn update<R>(
        &self,
        id: &JobId,
        mutator: impl FnOnce(&mut JobRecord) -> R,
    ) -> Result<R, StemsplitError> {
        let mut jobs = self.write();
        let record = jobs
            .get_mut(id)
            .ok_or_else(|| StemsplitError::JobNotFound(id.clone()))?;
        let out = mutator(record);
        record.updated_at = Utc::now();
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Drops terminal records whose last update is older than `ttl`.
    /// Active jobs are always kept. Returns the number removed.
    pub fn evict_terminal_older_than(&self, ttl: Duration) -> usize {
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return 0;
        };
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, record| !(record.is_terminal() && record.updated_at < cutoff));
        before - jobs.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.read().unwrap_or_else(|e| {
            tracing::error!("job store lock poisoned on read: {e}");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.write().unwrap_or_else(|e| {
            tracing::error!("job store lock poisoned on write: {e}");
            e.into_inner()
        })
    }
}
