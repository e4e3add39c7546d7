// src/domain/activity.rs

use crate::errors::ServerError;
use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

/// What happened to a lead. One variant per ledger entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    LeadCreated,
    StatusChange,
    NoteAdded,
    Assigned,
    CallLogged,
    EmailSent,
    ViewingScheduled,
    ViewingCompleted,
    PropertyInterested,
    SyncedToExternal,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::LeadCreated => "lead_created",
            ActivityKind::StatusChange => "status_change",
            ActivityKind::NoteAdded => "note_added",
            ActivityKind::Assigned => "assigned",
            ActivityKind::CallLogged => "call_logged",
            ActivityKind::EmailSent => "email_sent",
            ActivityKind::ViewingScheduled => "viewing_scheduled",
            ActivityKind::ViewingCompleted => "viewing_completed",
            ActivityKind::PropertyInterested => "property_interested",
            ActivityKind::SyncedToExternal => "synced_to_external",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ServerError> {
        match s {
            "lead_created" => Ok(ActivityKind::LeadCreated),
            "status_change" => Ok(ActivityKind::StatusChange),
            "note_added" => Ok(ActivityKind::NoteAdded),
            "assigned" => Ok(ActivityKind::Assigned),
            "call_logged" => Ok(ActivityKind::CallLogged),
            "email_sent" => Ok(ActivityKind::EmailSent),
            "viewing_scheduled" => Ok(ActivityKind::ViewingScheduled),
            "viewing_completed" => Ok(ActivityKind::ViewingCompleted),
            "property_interested" => Ok(ActivityKind::PropertyInterested),
            "synced_to_external" => Ok(ActivityKind::SyncedToExternal),
            other => Err(ServerError::DbError(format!(
                "unknown activity kind in storage: {other}"
            ))),
        }
    }
}

/// Immutable ledger entry. Owned by its lead; never edited after insert.
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub id: i64,
    pub lead_id: i64,
    pub kind: ActivityKind,
    pub description: String,
    pub actor_id: Option<i64>,
    pub actor_name: Option<String>,
    pub metadata: Value,
    pub created_at: NaiveDateTime,
}
