use crate::db::connection::Database;
use crate::domain::activity::{Activity, ActivityKind};
use crate::domain::lead::{Actor, Lead, LeadStatus, NewLead, PropertyInterest};
use crate::domain::viewing::{NewViewing, Viewing, ViewingStatus};
use crate::errors::ServerError;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};

/// Every mutating operation in this module follows the same shape: open one
/// transaction, mutate the lead row (or a sub-entity row), append the matching
/// activity, commit, then reload the full aggregate. Either the mutation and
/// its ledger entry both land, or neither does.

pub fn create_lead(db: &Database, new: &NewLead) -> Result<Lead, ServerError> {
    new.validate()?;
    let now = Utc::now().naive_utc();

    db.with_conn(|conn| {
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO leads (name, email, phone, subject, message, status, source, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
            params![
                new.name.trim(),
                new.email.trim(),
                new.phone,
                new.subject,
                new.message,
                LeadStatus::New.as_str(),
                new.source,
                now,
            ],
        )?;
        let lead_id = tx.last_insert_rowid();

        insert_activity(
            &tx,
            lead_id,
            ActivityKind::LeadCreated,
            &format!("Lead created from {}", new.source),
            &Actor::default(),
            json!({ "source": new.source }),
            now,
        )?;

        tx.commit()?;
        load_lead(conn, lead_id)
    })
}

/// Create a lead discovered during a pull sync, already linked to its remote
/// record and carrying the remote's pipeline status.
pub fn create_imported_lead(
    db: &Database,
    new: &NewLead,
    external_id: i64,
    status: LeadStatus,
    external_write_ts: Option<NaiveDateTime>,
) -> Result<Lead, ServerError> {
    new.validate()?;
    let now = Utc::now().naive_utc();

    db.with_conn(|conn| {
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO leads (name, email, phone, subject, message, status, source,
                               synced_to_external, external_id, synced_at, external_write_ts,
                               created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10, ?9, ?9)
            "#,
            params![
                new.name.trim(),
                new.email.trim(),
                new.phone,
                new.subject,
                new.message,
                status.as_str(),
                new.source,
                external_id,
                now,
                external_write_ts,
            ],
        )?;
        let lead_id = tx.last_insert_rowid();

        insert_activity(
            &tx,
            lead_id,
            ActivityKind::LeadCreated,
            "Lead imported from external CRM",
            &Actor::system(),
            json!({ "source": new.source, "external_id": external_id }),
            now,
        )?;

        tx.commit()?;
        load_lead(conn, lead_id)
    })
}

pub fn change_status(
    db: &Database,
    lead_id: i64,
    new_status: &str,
    actor: &Actor,
) -> Result<Lead, ServerError> {
    let status = LeadStatus::parse(new_status)?;
    let now = Utc::now().naive_utc();

    db.with_conn(|conn| {
        let tx = conn.transaction()?;

        let old = current_status(&tx, lead_id)?;
        tx.execute(
            "UPDATE leads SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, lead_id],
        )?;

        insert_activity(
            &tx,
            lead_id,
            ActivityKind::StatusChange,
            &format!("Status changed from {} to {}", old.as_str(), status.as_str()),
            actor,
            json!({ "from": old.as_str(), "to": status.as_str() }),
            now,
        )?;

        tx.commit()?;
        load_lead(conn, lead_id)
    })
}

pub fn assign_lead(
    db: &Database,
    lead_id: i64,
    agent_id: i64,
    agent_name: &str,
    actor: &Actor,
) -> Result<Lead, ServerError> {
    if agent_name.trim().is_empty() {
        return Err(ServerError::Validation("agent name is required".into()));
    }
    let now = Utc::now().naive_utc();

    db.with_conn(|conn| {
        let tx = conn.transaction()?;

        let previous: Option<(Option<i64>, Option<String>)> = tx
            .query_row(
                "SELECT assigned_to, assigned_to_name FROM leads WHERE id = ?1",
                params![lead_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (prev_id, prev_name) = previous.ok_or(ServerError::NotFound)?;

        tx.execute(
            r#"
            UPDATE leads
            SET assigned_to = ?1, assigned_to_name = ?2, assigned_at = ?3,
                assigned_by = ?4, updated_at = ?3
            WHERE id = ?5
            "#,
            params![agent_id, agent_name, now, actor.id, lead_id],
        )?;

        // First assignment and reassignment read differently in the ledger,
        // and a reassignment keeps the previous agent for audit. Reassigning
        // to the same agent still logs.
        let (description, metadata) = match prev_id {
            Some(prev) => (
                format!("Reassigned to {agent_name}"),
                json!({
                    "agent_id": agent_id,
                    "agent_name": agent_name,
                    "previous_agent": prev,
                    "previous_agent_name": prev_name,
                }),
            ),
            None => (
                format!("Assigned to {agent_name}"),
                json!({ "agent_id": agent_id, "agent_name": agent_name }),
            ),
        };

        insert_activity(
            &tx,
            lead_id,
            ActivityKind::Assigned,
            &description,
            actor,
            metadata,
            now,
        )?;

        tx.commit()?;
        load_lead(conn, lead_id)
    })
}

pub fn add_note(
    db: &Database,
    lead_id: i64,
    note: &str,
    actor: &Actor,
) -> Result<Lead, ServerError> {
    if note.trim().is_empty() {
        return Err(ServerError::Validation("note text is required".into()));
    }
    append_simple_activity(
        db,
        lead_id,
        ActivityKind::NoteAdded,
        note.trim(),
        actor,
        json!({}),
    )
}

pub fn log_call(
    db: &Database,
    lead_id: i64,
    summary: &str,
    actor: &Actor,
) -> Result<Lead, ServerError> {
    if summary.trim().is_empty() {
        return Err(ServerError::Validation("call summary is required".into()));
    }
    append_simple_activity(
        db,
        lead_id,
        ActivityKind::CallLogged,
        summary.trim(),
        actor,
        json!({}),
    )
}

pub fn log_email(
    db: &Database,
    lead_id: i64,
    subject: &str,
    actor: &Actor,
) -> Result<Lead, ServerError> {
    if subject.trim().is_empty() {
        return Err(ServerError::Validation("email subject is required".into()));
    }
    append_simple_activity(
        db,
        lead_id,
        ActivityKind::EmailSent,
        &format!("Email sent: {}", subject.trim()),
        actor,
        json!({ "subject": subject.trim() }),
    )
}

pub fn add_property_interest(
    db: &Database,
    lead_id: i64,
    property_ref: &str,
    note: Option<&str>,
    actor: &Actor,
) -> Result<Lead, ServerError> {
    if property_ref.trim().is_empty() {
        return Err(ServerError::Validation(
            "property reference is required".into(),
        ));
    }
    let property_ref = property_ref.trim();
    let now = Utc::now().naive_utc();

    db.with_conn(|conn| {
        let tx = conn.transaction()?;
        ensure_lead_exists(&tx, lead_id)?;

        // Upsert keyed by (lead, property): a repeated interest refreshes the
        // note instead of duplicating the row.
        tx.execute(
            r#"
            INSERT INTO lead_property_interests (lead_id, property_ref, note, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(lead_id, property_ref) DO UPDATE SET
                note = excluded.note
            "#,
            params![lead_id, property_ref, note, now],
        )?;
        tx.execute(
            "UPDATE leads SET updated_at = ?1 WHERE id = ?2",
            params![now, lead_id],
        )?;

        insert_activity(
            &tx,
            lead_id,
            ActivityKind::PropertyInterested,
            &format!("Interested in property {property_ref}"),
            actor,
            json!({ "property_ref": property_ref, "note": note }),
            now,
        )?;

        tx.commit()?;
        load_lead(conn, lead_id)
    })
}

pub fn schedule_viewing(
    db: &Database,
    lead_id: i64,
    new: &NewViewing,
    actor: &Actor,
) -> Result<(Lead, i64), ServerError> {
    let scheduled_for = new.validate()?;
    let property_ref = new.property_ref.trim();
    let now = Utc::now().naive_utc();

    db.with_conn(|conn| {
        let tx = conn.transaction()?;
        ensure_lead_exists(&tx, lead_id)?;

        tx.execute(
            r#"
            INSERT INTO lead_viewings (lead_id, property_ref, scheduled_for, status, created_by, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                lead_id,
                property_ref,
                scheduled_for,
                ViewingStatus::Scheduled.as_str(),
                actor.id,
                now,
            ],
        )?;
        let viewing_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE leads SET updated_at = ?1 WHERE id = ?2",
            params![now, lead_id],
        )?;

        insert_activity(
            &tx,
            lead_id,
            ActivityKind::ViewingScheduled,
            &format!("Viewing scheduled for property {property_ref}"),
            actor,
            json!({
                "viewing_id": viewing_id,
                "property_ref": property_ref,
                "scheduled_for": scheduled_for.to_string(),
            }),
            now,
        )?;

        tx.commit()?;
        Ok((load_lead(conn, lead_id)?, viewing_id))
    })
}

pub fn complete_viewing(
    db: &Database,
    lead_id: i64,
    viewing_id: i64,
    outcome: Option<&str>,
    notes: Option<&str>,
    actor: &Actor,
) -> Result<Lead, ServerError> {
    close_viewing(
        db,
        lead_id,
        viewing_id,
        ViewingStatus::Completed,
        outcome,
        notes,
        actor,
    )
}

pub fn cancel_viewing(
    db: &Database,
    lead_id: i64,
    viewing_id: i64,
    reason: Option<&str>,
    actor: &Actor,
) -> Result<Lead, ServerError> {
    close_viewing(
        db,
        lead_id,
        viewing_id,
        ViewingStatus::Cancelled,
        None,
        reason,
        actor,
    )
}

/// Shared transition for the two terminal viewing states. Validates the
/// current state inside the transaction so a concurrent close cannot slip in
/// between the check and the write.
fn close_viewing(
    db: &Database,
    lead_id: i64,
    viewing_id: i64,
    target: ViewingStatus,
    outcome: Option<&str>,
    notes: Option<&str>,
    actor: &Actor,
) -> Result<Lead, ServerError> {
    let now = Utc::now().naive_utc();

    db.with_conn(|conn| {
        let tx = conn.transaction()?;
        ensure_lead_exists(&tx, lead_id)?;

        let current: Option<(String, String)> = tx
            .query_row(
                "SELECT status, property_ref FROM lead_viewings WHERE id = ?1 AND lead_id = ?2",
                params![viewing_id, lead_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (status_text, property_ref) = current.ok_or(ServerError::NotFound)?;
        ViewingStatus::parse(&status_text)?.ensure_can_close()?;

        tx.execute(
            r#"
            UPDATE lead_viewings
            SET status = ?1, outcome = ?2, notes = ?3, completed_by = ?4, completed_at = ?5
            WHERE id = ?6
            "#,
            params![target.as_str(), outcome, notes, actor.id, now, viewing_id],
        )?;
        tx.execute(
            "UPDATE leads SET updated_at = ?1 WHERE id = ?2",
            params![now, lead_id],
        )?;

        // The ledger has a single closure kind; the metadata `result` field
        // distinguishes a completion from a cancellation.
        let description = format!("Viewing of property {property_ref} {}", target.as_str());
        insert_activity(
            &tx,
            lead_id,
            ActivityKind::ViewingCompleted,
            &description,
            actor,
            json!({
                "viewing_id": viewing_id,
                "property_ref": property_ref,
                "result": target.as_str(),
                "outcome": outcome,
                "notes": notes,
            }),
            now,
        )?;

        tx.commit()?;
        load_lead(conn, lead_id)
    })
}

/// Called only by the sync engine after a successful push or pull link.
pub fn mark_synced(db: &Database, lead_id: i64, external_id: i64) -> Result<Lead, ServerError> {
    let now = Utc::now().naive_utc();

    db.with_conn(|conn| {
        let tx = conn.transaction()?;
        ensure_lead_exists(&tx, lead_id)?;

        tx.execute(
            r#"
            UPDATE leads
            SET synced_to_external = 1, external_id = ?1, synced_at = ?2, updated_at = ?2
            WHERE id = ?3
            "#,
            params![external_id, now, lead_id],
        )?;

        insert_activity(
            &tx,
            lead_id,
            ActivityKind::SyncedToExternal,
            &format!("Synced to external CRM record {external_id}"),
            &Actor::system(),
            json!({ "external_id": external_id }),
            now,
        )?;

        tx.commit()?;
        load_lead(conn, lead_id)
    })
}

/// Pull-side overwrite: last-write-wins from the remote record. Only status,
/// the remote write timestamp, and (when it differs) the contact name are
/// touched; activities, viewings and notes stay local-only.
pub fn apply_remote_update(
    db: &Database,
    lead_id: i64,
    status: LeadStatus,
    remote_name: Option<&str>,
    external_write_ts: Option<NaiveDateTime>,
) -> Result<(), ServerError> {
    let now = Utc::now().naive_utc();

    db.with_conn(|conn| {
        ensure_lead_exists(conn, lead_id)?;
        conn.execute(
            r#"
            UPDATE leads
            SET status = ?1,
                name = COALESCE(?2, name),
                external_write_ts = ?3,
                updated_at = ?4
            WHERE id = ?5
            "#,
            params![status.as_str(), remote_name, external_write_ts, now, lead_id],
        )?;
        Ok(())
    })
}

pub fn get_lead(db: &Database, lead_id: i64) -> Result<Lead, ServerError> {
    db.with_conn(|conn| load_lead(conn, lead_id))
}

pub fn find_id_by_external_id(
    db: &Database,
    external_id: i64,
) -> Result<Option<i64>, ServerError> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT id FROM leads WHERE external_id = ?1",
            params![external_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(ServerError::from)
    })
}

/// Recent leads for the admin listing, newest activity first.
pub fn list_leads(db: &Database, limit: usize) -> Result<Vec<Lead>, ServerError> {
    let ids: Vec<i64> = db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT id FROM leads ORDER BY updated_at DESC, id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    })?;

    let mut leads = Vec::with_capacity(ids.len());
    for id in ids {
        leads.push(get_lead(db, id)?);
    }
    Ok(leads)
}

pub fn count_by_status(db: &Database) -> Result<Vec<(String, i64)>, ServerError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM leads GROUP BY status ORDER BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    })
}

// --- internals ---

fn append_simple_activity(
    db: &Database,
    lead_id: i64,
    kind: ActivityKind,
    description: &str,
    actor: &Actor,
    metadata: Value,
) -> Result<Lead, ServerError> {
    let now = Utc::now().naive_utc();

    db.with_conn(|conn| {
        let tx = conn.transaction()?;
        ensure_lead_exists(&tx, lead_id)?;

        tx.execute(
            "UPDATE leads SET updated_at = ?1 WHERE id = ?2",
            params![now, lead_id],
        )?;
        insert_activity(&tx, lead_id, kind, description, actor, metadata, now)?;

        tx.commit()?;
        load_lead(conn, lead_id)
    })
}

fn ensure_lead_exists(conn: &Connection, lead_id: i64) -> Result<(), ServerError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM leads WHERE id = ?1",
            params![lead_id],
            |row| row.get(0),
        )
        .optional()?;
    found.map(|_| ()).ok_or(ServerError::NotFound)
}

fn current_status(conn: &Connection, lead_id: i64) -> Result<LeadStatus, ServerError> {
    let text: Option<String> = conn
        .query_row(
            "SELECT status FROM leads WHERE id = ?1",
            params![lead_id],
            |row| row.get(0),
        )
        .optional()?;
    let text = text.ok_or(ServerError::NotFound)?;
    LeadStatus::parse(&text)
        .map_err(|_| ServerError::DbError(format!("corrupt lead status in storage: {text}")))
}

fn insert_activity(
    conn: &Connection,
    lead_id: i64,
    kind: ActivityKind,
    description: &str,
    actor: &Actor,
    metadata: Value,
    now: NaiveDateTime,
) -> Result<(), ServerError> {
    conn.execute(
        r#"
        INSERT INTO lead_activities (lead_id, kind, description, actor_id, actor_name, metadata, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            lead_id,
            kind.as_str(),
            description,
            actor.id,
            actor.name,
            metadata.to_string(),
            now,
        ],
    )?;
    Ok(())
}

/// Loads the full aggregate: the lead row plus activities (newest first),
/// viewings, and property interests.
fn load_lead(conn: &Connection, lead_id: i64) -> Result<Lead, ServerError> {
    let mut lead = conn
        .query_row(
            r#"
            SELECT id, name, email, phone, subject, message, status, source,
                   assigned_to, assigned_to_name, assigned_at, assigned_by,
                   synced_to_external, external_id, synced_at, external_write_ts,
                   created_at, updated_at
            FROM leads WHERE id = ?1
            "#,
            params![lead_id],
            |row| {
                let status_text: String = row.get(6)?;
                Ok((
                    Lead {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        phone: row.get(3)?,
                        subject: row.get(4)?,
                        message: row.get(5)?,
                        status: LeadStatus::New, // patched below from status_text
                        source: row.get(7)?,
                        assigned_to: row.get(8)?,
                        assigned_to_name: row.get(9)?,
                        assigned_at: row.get(10)?,
                        assigned_by: row.get(11)?,
                        synced_to_external: row.get(12)?,
                        external_id: row.get(13)?,
                        synced_at: row.get(14)?,
                        external_write_ts: row.get(15)?,
                        created_at: row.get(16)?,
                        updated_at: row.get(17)?,
                        activities: Vec::new(),
                        viewings: Vec::new(),
                        interested_properties: Vec::new(),
                    },
                    status_text,
                ))
            },
        )
        .optional()?
        .ok_or(ServerError::NotFound)
        .and_then(|(mut lead, status_text)| {
            lead.status = LeadStatus::parse(&status_text).map_err(|_| {
                ServerError::DbError(format!("corrupt lead status in storage: {status_text}"))
            })?;
            Ok(lead)
        })?;

    lead.activities = load_activities(conn, lead_id)?;
    lead.viewings = load_viewings(conn, lead_id)?;
    lead.interested_properties = load_interests(conn, lead_id)?;
    Ok(lead)
}

fn load_activities(conn: &Connection, lead_id: i64) -> Result<Vec<Activity>, ServerError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, kind, description, actor_id, actor_name, metadata, created_at
        FROM lead_activities
        WHERE lead_id = ?1
        ORDER BY id DESC
        "#,
    )?;
    let rows = stmt.query_map(params![lead_id], |row| {
        let kind_text: String = row.get(1)?;
        let metadata_text: String = row.get(5)?;
        Ok((
            row.get::<_, i64>(0)?,
            kind_text,
            row.get::<_, String>(2)?,
            row.get::<_, Option<i64>>(3)?,
            row.get::<_, Option<String>>(4)?,
            metadata_text,
            row.get::<_, NaiveDateTime>(6)?,
        ))
    })?;

    let mut activities = Vec::new();
    for row in rows {
        let (id, kind_text, description, actor_id, actor_name, metadata_text, created_at) = row?;
        activities.push(Activity {
            id,
            lead_id,
            kind: ActivityKind::parse(&kind_text)?,
            description,
            actor_id,
            actor_name,
            metadata: serde_json::from_str(&metadata_text)
                .map_err(|e| ServerError::DbError(format!("corrupt activity metadata: {e}")))?,
            created_at,
        });
    }
    Ok(activities)
}

fn load_viewings(conn: &Connection, lead_id: i64) -> Result<Vec<Viewing>, ServerError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, property_ref, scheduled_for, status, outcome, notes,
               created_by, completed_by, completed_at, created_at
        FROM lead_viewings
        WHERE lead_id = ?1
        ORDER BY id
        "#,
    )?;
    let rows = stmt.query_map(params![lead_id], |row| {
        let status_text: String = row.get(3)?;
        Ok((
            Viewing {
                id: row.get(0)?,
                lead_id,
                property_ref: row.get(1)?,
                scheduled_for: row.get(2)?,
                status: ViewingStatus::Scheduled, // patched below
                outcome: row.get(4)?,
                notes: row.get(5)?,
                created_by: row.get(6)?,
                completed_by: row.get(7)?,
                completed_at: row.get(8)?,
                created_at: row.get(9)?,
            },
            status_text,
        ))
    })?;

    let mut viewings = Vec::new();
    for row in rows {
        let (mut viewing, status_text) = row?;
        viewing.status = ViewingStatus::parse(&status_text)?;
        viewings.push(viewing);
    }
    Ok(viewings)
}

fn load_interests(conn: &Connection, lead_id: i64) -> Result<Vec<PropertyInterest>, ServerError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT property_ref, note, created_at
        FROM lead_property_interests
        WHERE lead_id = ?1
        ORDER BY created_at
        "#,
    )?;
    let rows = stmt.query_map(params![lead_id], |row| {
        Ok(PropertyInterest {
            property_ref: row.get(0)?,
            note: row.get(1)?,
            created_at: row.get(2)?,
        })
    })?;

    let mut interests = Vec::new();
    for row in rows {
        interests.push(row?);
    }
    Ok(interests)
}
