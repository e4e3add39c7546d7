// src/sync/pull.rs
use crate::crm::{CrmApi, RemoteLead};
use crate::db::connection::Database;
use crate::db::leads;
use crate::db::sync_runs::{self, SyncKind, SyncRecordError, SyncSummary};
use crate::domain::lead::{LeadStatus, NewLead};
use crate::errors::ServerError;
use crate::sync::stage_map::status_for_stage;
use chrono::{NaiveDateTime, Utc};

#[derive(Debug)]
pub struct PullOutcome {
    pub run_id: i64,
    pub summary: SyncSummary,
    pub errors: Vec<SyncRecordError>,
}

enum RecordAction {
    Created,
    Updated,
}

/// Imports remote changes since the last successful pull. Callers go through
/// `SyncEngine::run_pull`, which serializes executions.
///
/// Per-record failures are captured into the run's error list and the batch
/// keeps going; the run still completes and its completion time becomes the
/// next watermark. Only a failure before any record can be processed (login,
/// the fetch itself) marks the run failed, leaving the watermark in place.
pub(super) fn run_pull(
    db: &Database,
    crm: &dyn CrmApi,
    page_size: usize,
    triggered_by: Option<i64>,
) -> Result<PullOutcome, ServerError> {
    let watermark = sync_runs::last_completed(db, SyncKind::Pull)?
        .and_then(|run| run.completed_at)
        .unwrap_or(NaiveDateTime::UNIX_EPOCH);

    let run_id = sync_runs::start_run(db, SyncKind::Pull, triggered_by)?;
    eprintln!("🔄 Pull sync #{run_id} started (changes since {watermark})");

    let records = match crm.fetch_leads_changed_since(watermark, page_size) {
        Ok(records) => records,
        Err(e) => {
            let message = e.to_string();
            sync_runs::fail_run(db, run_id, &message)?;
            eprintln!("❌ Pull sync #{run_id} failed before processing: {message}");
            return Err(ServerError::Upstream(message));
        }
    };

    let mut summary = SyncSummary::default();
    let mut errors = Vec::new();

    for record in &records {
        summary.processed += 1;
        match apply_remote_record(db, record) {
            Ok(RecordAction::Created) => summary.created += 1,
            Ok(RecordAction::Updated) => summary.updated += 1,
            Err(e) => {
                summary.failed += 1;
                errors.push(SyncRecordError {
                    record_id: record.id.to_string(),
                    message: e.to_string(),
                    timestamp: Utc::now().naive_utc(),
                });
            }
        }
    }

    sync_runs::finish_run(db, run_id, &summary, &errors)?;
    eprintln!(
        "✅ Pull sync #{run_id} complete: {} processed, {} created, {} updated, {} failed",
        summary.processed, summary.created, summary.updated, summary.failed
    );

    Ok(PullOutcome {
        run_id,
        summary,
        errors,
    })
}

/// Upsert keyed by the remote id. An existing link gets a last-write-wins
/// overwrite of status (and name, only when the remote one differs); an
/// unseen id becomes a new local lead sourced as an external import.
fn apply_remote_record(db: &Database, record: &RemoteLead) -> Result<RecordAction, ServerError> {
    let status = record
        .stage_name
        .as_deref()
        .map(status_for_stage)
        .unwrap_or(LeadStatus::New);

    match leads::find_id_by_external_id(db, record.id)? {
        Some(lead_id) => {
            let local = leads::get_lead(db, lead_id)?;
            let remote_name = record.contact_name.as_deref().or(record.name.as_deref());
            let name_override = remote_name.filter(|name| *name != local.name);

            leads::apply_remote_update(db, lead_id, status, name_override, record.write_date)?;
            Ok(RecordAction::Updated)
        }
        None => {
            let new = NewLead {
                name: record
                    .contact_name
                    .clone()
                    .or_else(|| record.name.clone())
                    .unwrap_or_default(),
                email: record.email.clone().unwrap_or_default(),
                phone: record.phone.clone(),
                subject: record.name.clone(),
                message: compose_import_message(record),
                source: "external_import".to_string(),
            };
            leads::create_imported_lead(db, &new, record.id, status, record.write_date)?;
            Ok(RecordAction::Created)
        }
    }
}

/// Folds the remote description and the real-estate custom fields into the
/// free-text message of a freshly imported lead.
fn compose_import_message(record: &RemoteLead) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(description) = &record.description {
        parts.push(description.clone());
    }
    if let Some(budget) = &record.budget_range {
        parts.push(format!("Budget: {budget}"));
    }
    if let Some(region) = &record.preferred_region {
        parts.push(format!("Preferred region: {region}"));
    }
    if let Some(interest) = &record.property_interest {
        parts.push(format!("Property interest: {interest}"));
    }
    if let Some(pref) = &record.comm_pref {
        parts.push(format!("Preferred contact: {pref}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}
