// src/domain/viewing.rs

use crate::errors::ServerError;
use chrono::NaiveDateTime;
use serde::Serialize;

/// Lifecycle of a property viewing. `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewingStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl ViewingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewingStatus::Scheduled => "scheduled",
            ViewingStatus::Completed => "completed",
            ViewingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ServerError> {
        match s {
            "scheduled" => Ok(ViewingStatus::Scheduled),
            "completed" => Ok(ViewingStatus::Completed),
            "cancelled" => Ok(ViewingStatus::Cancelled),
            other => Err(ServerError::DbError(format!(
                "unknown viewing status in storage: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ViewingStatus::Completed | ViewingStatus::Cancelled)
    }

    /// Guard for the only two transitions that exist. Errors name the blocked
    /// transition so the caller can surface it directly.
    pub fn ensure_can_close(&self) -> Result<(), ServerError> {
        if self.is_terminal() {
            return Err(ServerError::InvalidState(format!(
                "viewing is already {}",
                self.as_str()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Viewing {
    pub id: i64,
    pub lead_id: i64,
    pub property_ref: String,
    pub scheduled_for: NaiveDateTime,
    pub status: ViewingStatus,
    pub outcome: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<i64>,
    pub completed_by: Option<i64>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// Input to `schedule_viewing`. The date arrives as an optional parse result
/// from the API so the aggregate can reject a missing/garbled one itself.
#[derive(Debug, Clone)]
pub struct NewViewing {
    pub property_ref: String,
    pub scheduled_for: Option<NaiveDateTime>,
}

impl NewViewing {
    pub fn validate(&self) -> Result<NaiveDateTime, ServerError> {
        if self.property_ref.trim().is_empty() {
            return Err(ServerError::Validation(
                "viewing property reference is required".into(),
            ));
        }
        self.scheduled_for
            .ok_or_else(|| ServerError::Validation("viewing date/time is required".into()))
    }
}
