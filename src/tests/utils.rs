use crate::crm::{CrmApi, CrmError, NewRemoteLead, RemoteLead, RemoteLeadPatch};
use crate::db::connection::{init_db, Database};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Initialize a fresh test DB using the production schema. Each test gets its
/// own file so leftover state from other tests (or earlier runs) cannot leak.
pub fn init_test_db(name: &str) -> Database {
    let path = format!("test_{name}.sqlite");
    let _ = std::fs::remove_file(&path);

    let db = Database::new(path);
    init_db(&db, "sql/schema.sql")
        .unwrap_or_else(|e| panic!("Database initialization failed: {e}"));
    db
}

/// A fixed remote write timestamp safely in the past, so a re-pull after a
/// real completed run sees no "new" changes.
pub fn old_write_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 15)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
}

pub fn remote_lead(id: i64, contact_name: &str, email: &str, stage: &str) -> RemoteLead {
    RemoteLead {
        id,
        name: Some(format!("Opportunity {id}")),
        contact_name: Some(contact_name.to_string()),
        email: Some(email.to_string()),
        phone: None,
        description: None,
        stage_name: Some(stage.to_string()),
        write_date: Some(old_write_date()),
        budget_range: None,
        preferred_region: None,
        property_interest: None,
        comm_pref: None,
    }
}

/// Scripted CRM double. Serves a fixed set of remote leads, resolves stages
/// from a fixed table, and records every write for assertions.
pub struct FakeCrm {
    pub leads: Mutex<Vec<RemoteLead>>,
    pub stages: HashMap<String, i64>,
    pub sources: Mutex<HashMap<String, i64>>,
    pub updates: Mutex<Vec<(i64, RemoteLeadPatch)>>,
    pub created: Mutex<Vec<NewRemoteLead>>,
    pub fail_fetch: bool,
    pub fail_update: bool,
    /// Artificial latency on fetch, for tests that race two pulls.
    pub fetch_delay: std::time::Duration,
    next_id: AtomicI64,
}

impl FakeCrm {
    pub fn new(leads: Vec<RemoteLead>) -> Self {
        let stages = [
            "New Lead",
            "Contacted",
            "Qualified",
            "Viewing Scheduled",
            "Negotiation",
            "Won",
            "Lost",
        ]
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i as i64 + 1))
        .collect();

        Self {
            leads: Mutex::new(leads),
            stages,
            sources: Mutex::new(HashMap::new()),
            updates: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            fail_fetch: false,
            fail_update: false,
            fetch_delay: std::time::Duration::ZERO,
            next_id: AtomicI64::new(9000),
        }
    }

    /// A fake with no stage table, to exercise the unmapped-stage path.
    pub fn without_stages(leads: Vec<RemoteLead>) -> Self {
        let mut fake = Self::new(leads);
        fake.stages.clear();
        fake
    }

    pub fn remote_description(&self, external_id: i64) -> Option<String> {
        self.leads
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.id == external_id)
            .and_then(|l| l.description.clone())
    }
}

impl CrmApi for FakeCrm {
    fn fetch_leads_changed_since(
        &self,
        since: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<RemoteLead>, CrmError> {
        if self.fail_fetch {
            return Err(CrmError::Transient("connection refused".into()));
        }
        if !self.fetch_delay.is_zero() {
            std::thread::sleep(self.fetch_delay);
        }
        let leads = self.leads.lock().unwrap();
        Ok(leads
            .iter()
            .filter(|l| l.write_date.map(|d| d > since).unwrap_or(false))
            .take(limit)
            .cloned()
            .collect())
    }

    fn read_lead(&self, external_id: i64) -> Result<Option<RemoteLead>, CrmError> {
        let leads = self.leads.lock().unwrap();
        Ok(leads.iter().find(|l| l.id == external_id).cloned())
    }

    fn create_lead(&self, new: &NewRemoteLead) -> Result<i64, CrmError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push(new.clone());
        self.leads.lock().unwrap().push(RemoteLead {
            id,
            name: Some(new.name.clone()),
            contact_name: Some(new.contact_name.clone()),
            email: Some(new.email.clone()),
            phone: new.phone.clone(),
            description: new.description.clone(),
            stage_name: Some("New Lead".to_string()),
            write_date: Some(old_write_date()),
            ..Default::default()
        });
        Ok(id)
    }

    fn update_lead(&self, external_id: i64, patch: &RemoteLeadPatch) -> Result<(), CrmError> {
        if self.fail_update {
            return Err(CrmError::Transient("write timed out".into()));
        }
        let mut leads = self.leads.lock().unwrap();
        let lead = leads
            .iter_mut()
            .find(|l| l.id == external_id)
            .ok_or_else(|| CrmError::Structural(format!("no remote record {external_id}")))?;
        if let Some(description) = &patch.description {
            lead.description = Some(description.clone());
        }
        self.updates.lock().unwrap().push((external_id, patch.clone()));
        Ok(())
    }

    fn get_stage_id(&self, stage_name: &str) -> Result<i64, CrmError> {
        self.stages
            .get(stage_name)
            .copied()
            .ok_or_else(|| CrmError::UnmappedStage(stage_name.to_string()))
    }

    fn get_or_create_source(&self, name: &str) -> Result<i64, CrmError> {
        let mut sources = self.sources.lock().unwrap();
        let next = sources.len() as i64 + 100;
        Ok(*sources.entry(name.to_string()).or_insert(next))
    }
}
