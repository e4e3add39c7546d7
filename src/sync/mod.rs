pub mod pull;
pub mod push;
pub mod stage_map;

pub use pull::PullOutcome;
pub use push::{export_lead, push_lead, PushReport};

use crate::crm::CrmApi;
use crate::db::connection::Database;
use crate::errors::ServerError;
use std::sync::Mutex;

/// Owns the mutual exclusion for pull reconciliation. Two concurrent pull
/// triggers would read the same watermark and double-process the remote
/// change set; the loser of this lock gets SyncBusy instead.
pub struct SyncEngine {
    pull_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self {
            pull_lock: Mutex::new(()),
        }
    }

    pub fn run_pull(
        &self,
        db: &Database,
        crm: &dyn CrmApi,
        page_size: usize,
        triggered_by: Option<i64>,
    ) -> Result<PullOutcome, ServerError> {
        let _guard = self
            .pull_lock
            .try_lock()
            .map_err(|_| ServerError::SyncBusy)?;
        pull::run_pull(db, crm, page_size, triggered_by)
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}
