// src/domain/lead.rs

use crate::domain::activity::Activity;
use crate::domain::viewing::Viewing;
use crate::errors::ServerError;
use chrono::NaiveDateTime;
use serde::Serialize;

/// Pipeline position of a lead. Every status write, whether from the API or
/// from the sync engine, goes through `parse` so an unrecognized value can
/// never reach storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Viewing,
    Negotiating,
    Won,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Viewing => "viewing",
            LeadStatus::Negotiating => "negotiating",
            LeadStatus::Won => "won",
            LeadStatus::Lost => "lost",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ServerError> {
        match s {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "qualified" => Ok(LeadStatus::Qualified),
            "viewing" => Ok(LeadStatus::Viewing),
            "negotiating" => Ok(LeadStatus::Negotiating),
            "won" => Ok(LeadStatus::Won),
            "lost" => Ok(LeadStatus::Lost),
            other => Err(ServerError::Validation(format!(
                "unknown lead status: {other}"
            ))),
        }
    }
}

/// Whoever performed an operation, for the activity ledger.
/// Always carried as a resolved id + display name, never a nested object.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub id: Option<i64>,
    pub name: Option<String>,
}

impl Actor {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: Some(name.into()),
        }
    }

    /// Used when the sync engine mutates a lead with no human behind it.
    pub fn system() -> Self {
        Self {
            id: None,
            name: Some("system".to_string()),
        }
    }
}

/// Input to `create_lead`, validated before anything touches the database.
#[derive(Debug, Clone)]
pub struct NewLead {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub source: String,
}

impl NewLead {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.name.trim().is_empty() {
            return Err(ServerError::Validation("name is required".into()));
        }
        if self.email.trim().is_empty() {
            return Err(ServerError::Validation("email is required".into()));
        }
        if !email_looks_valid(&self.email) {
            return Err(ServerError::Validation(format!(
                "malformed email: {}",
                self.email
            )));
        }
        Ok(())
    }
}

/// Minimal shape check: one '@' with a dotted domain after it.
fn email_looks_valid(email: &str) -> bool {
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    match parts.next() {
        Some(domain) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyInterest {
    pub property_ref: String,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
}

/// The full lead aggregate as loaded from storage: the lead row plus its
/// owned activities (newest first), viewings, and property interests.
#[derive(Debug, Serialize)]
pub struct Lead {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub status: LeadStatus,
    pub source: String,

    pub assigned_to: Option<i64>,
    pub assigned_to_name: Option<String>,
    pub assigned_at: Option<NaiveDateTime>,
    pub assigned_by: Option<i64>,

    pub synced_to_external: bool,
    pub external_id: Option<i64>,
    pub synced_at: Option<NaiveDateTime>,
    pub external_write_ts: Option<NaiveDateTime>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,

    pub activities: Vec<Activity>,
    pub viewings: Vec<Viewing>,
    pub interested_properties: Vec<PropertyInterest>,
}

impl Lead {
    pub fn viewing(&self, viewing_id: i64) -> Option<&Viewing> {
        self.viewings.iter().find(|v| v.id == viewing_id)
    }
}
