// src/sync/push.rs
use crate::crm::{CrmApi, CrmError, NewRemoteLead, RemoteLeadPatch};
use crate::db::connection::Database;
use crate::db::leads;
use crate::db::sync_runs::{self, SyncKind, SyncSummary};
use crate::errors::ServerError;
use crate::sync::stage_map::stage_for_status;
use chrono::Utc;
use serde::Serialize;

/// Outcome of a push attempt, returned as data rather than an error so a
/// failed CRM write never blocks or rolls back the local mutation that
/// triggered it.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PushReport {
    /// The lead has no external record to push to. Not a failure.
    NotLinked,
    Pushed { external_id: i64, message: String },
    Failed { message: String },
}

impl PushReport {
    pub fn succeeded(&self) -> bool {
        matches!(self, PushReport::Pushed { .. })
    }
}

/// Propagates a linked lead's status (and optionally a note) to its remote
/// record. CRM failures come back as `PushReport::Failed`; only local storage
/// failures are `Err`.
pub fn push_lead(
    db: &Database,
    crm: &dyn CrmApi,
    lead_id: i64,
    note: Option<&str>,
    triggered_by: Option<i64>,
) -> Result<PushReport, ServerError> {
    let lead = leads::get_lead(db, lead_id)?;
    let external_id = match lead.external_id {
        Some(id) => id,
        None => return Ok(PushReport::NotLinked),
    };

    let run_id = sync_runs::start_run(db, SyncKind::Push, triggered_by)?;
    let mut messages = Vec::new();
    let mut patch = RemoteLeadPatch::default();

    // Stage goes into the payload only when the remote can resolve it. An
    // unmapped stage is reported, not silently replaced with a default.
    let stage_name = stage_for_status(lead.status);
    match crm.get_stage_id(stage_name) {
        Ok(stage_id) => patch.stage_id = Some(stage_id),
        Err(CrmError::UnmappedStage(name)) => {
            messages.push(format!("stage '{name}' has no remote counterpart, not pushed"));
        }
        Err(e) => return fail_push(db, run_id, external_id, e),
    }

    // A note is appended onto the remote description with a timestamp prefix;
    // the existing remote text is preserved.
    if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
        let current = match crm.read_lead(external_id) {
            Ok(Some(remote)) => remote.description.unwrap_or_default(),
            Ok(None) => {
                return fail_push(
                    db,
                    run_id,
                    external_id,
                    CrmError::Structural(format!("remote record {external_id} not found")),
                )
            }
            Err(e) => return fail_push(db, run_id, external_id, e),
        };
        patch.description = Some(append_note(&current, note.trim()));
    }

    // An empty patch still carries any messages gathered above, so an
    // unresolved stage is reported even when there was nothing to write.
    if patch.is_empty() {
        sync_runs::finish_run(db, run_id, &SyncSummary::default(), &[])?;
        messages.push("nothing to push".to_string());
        return Ok(PushReport::Pushed {
            external_id,
            message: messages.join("; "),
        });
    }

    if let Err(e) = crm.update_lead(external_id, &patch) {
        return fail_push(db, run_id, external_id, e);
    }

    leads::mark_synced(db, lead_id, external_id)?;
    sync_runs::finish_run(
        db,
        run_id,
        &SyncSummary {
            processed: 1,
            updated: 1,
            ..Default::default()
        },
        &[],
    )?;

    messages.push(format!("pushed to external record {external_id}"));
    Ok(PushReport::Pushed {
        external_id,
        message: messages.join("; "),
    })
}

/// Creates a remote record for a lead that is not yet linked, then links it.
/// The inverse of pull's external-import path.
pub fn export_lead(
    db: &Database,
    crm: &dyn CrmApi,
    lead_id: i64,
    triggered_by: Option<i64>,
) -> Result<PushReport, ServerError> {
    let lead = leads::get_lead(db, lead_id)?;
    if let Some(external_id) = lead.external_id {
        return Ok(PushReport::Failed {
            message: format!("lead is already linked to external record {external_id}"),
        });
    }

    let run_id = sync_runs::start_run(db, SyncKind::Push, triggered_by)?;
    let new = NewRemoteLead {
        name: lead
            .subject
            .clone()
            .unwrap_or_else(|| format!("Website lead: {}", lead.name)),
        contact_name: lead.name.clone(),
        email: lead.email.clone(),
        phone: lead.phone.clone(),
        description: lead.message.clone(),
        source_name: lead.source.clone(),
    };

    let external_id = match crm.create_lead(&new) {
        Ok(id) => id,
        Err(e) => return fail_push(db, run_id, lead_id, e),
    };

    leads::mark_synced(db, lead_id, external_id)?;
    sync_runs::finish_run(
        db,
        run_id,
        &SyncSummary {
            processed: 1,
            created: 1,
            ..Default::default()
        },
        &[],
    )?;

    Ok(PushReport::Pushed {
        external_id,
        message: format!("created external record {external_id}"),
    })
}

fn fail_push(
    db: &Database,
    run_id: i64,
    record_id: i64,
    e: CrmError,
) -> Result<PushReport, ServerError> {
    let message = format!("record {record_id}: {e}");
    sync_runs::fail_run(db, run_id, &message)?;
    eprintln!("⚠️ Push failed: {message}");
    Ok(PushReport::Failed { message })
}

fn append_note(current: &str, note: &str) -> String {
    let stamp = Utc::now().format("%Y-%m-%d %H:%M UTC");
    if current.trim().is_empty() {
        format!("[{stamp}] {note}")
    } else {
        format!("{current}\n\n[{stamp}] {note}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_note_preserves_existing_text() {
        let combined = append_note("Initial inquiry", "Called client");
        assert!(combined.starts_with("Initial inquiry\n\n["));
        assert!(combined.ends_with("] Called client"));
    }

    #[test]
    fn append_note_to_empty_description_has_no_leading_gap() {
        let combined = append_note("", "First contact");
        assert!(combined.starts_with('['));
        assert!(combined.ends_with("] First contact"));
    }
}
