mod client;
mod error;
pub mod retry;
pub mod session;

pub use client::CrmClient;
pub use error::CrmError;

use chrono::NaiveDateTime;

/// A lead record as the external CRM reports it. The client flattens the
/// remote relational fields (stage, source) into plain names/ids here so the
/// sync engine never sees the wire shape.
#[derive(Debug, Clone, Default)]
pub struct RemoteLead {
    pub id: i64,
    /// Opportunity title on the remote side.
    pub name: Option<String>,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub description: Option<String>,
    pub stage_name: Option<String>,
    pub write_date: Option<NaiveDateTime>,
    // Custom fields the remote carries for real-estate leads.
    pub budget_range: Option<String>,
    pub preferred_region: Option<String>,
    pub property_interest: Option<String>,
    pub comm_pref: Option<String>,
}

/// Fields for creating a remote lead record when exporting a local lead.
#[derive(Debug, Clone)]
pub struct NewRemoteLead {
    pub name: String,
    pub contact_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub description: Option<String>,
    /// Resolved to a remote source id via get_or_create_source.
    pub source_name: String,
}

/// A partial update pushed onto an existing remote lead. Only set fields are
/// written.
#[derive(Debug, Clone, Default)]
pub struct RemoteLeadPatch {
    pub stage_id: Option<i64>,
    /// Full replacement text for the remote description. The push adapter
    /// composes this by appending to the current remote text, never blindly.
    pub description: Option<String>,
}

impl RemoteLeadPatch {
    pub fn is_empty(&self) -> bool {
        self.stage_id.is_none() && self.description.is_none()
    }
}

/// The seam between the sync engine and the CRM transport. `CrmClient` is the
/// production implementation; tests script a fake.
pub trait CrmApi: Send + Sync {
    /// Leads whose remote modification time is strictly after `since`,
    /// bounded by `limit`.
    fn fetch_leads_changed_since(
        &self,
        since: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<RemoteLead>, CrmError>;

    fn read_lead(&self, external_id: i64) -> Result<Option<RemoteLead>, CrmError>;

    fn create_lead(&self, new: &NewRemoteLead) -> Result<i64, CrmError>;

    fn update_lead(&self, external_id: i64, patch: &RemoteLeadPatch) -> Result<(), CrmError>;

    /// Resolves a stage name to its remote id. An unknown name is an
    /// `UnmappedStage` error, never a silent default.
    fn get_stage_id(&self, stage_name: &str) -> Result<i64, CrmError>;

    /// Idempotent lookup-or-create of a source tagging record.
    fn get_or_create_source(&self, name: &str) -> Result<i64, CrmError>;
}
