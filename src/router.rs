use crate::config::CrmConfig;
use crate::crm::CrmApi;
use crate::db::connection::Database;
use crate::db::sync_runs::{self, SyncKind, SyncRunStatus};
use crate::db::leads;
use crate::domain::lead::{Actor, NewLead};
use crate::domain::viewing::NewViewing;
use crate::errors::ServerError;
use crate::responses::{json_response, json_status, ResultResp};
use crate::sync;
use astra::Request;
use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

/// Everything the routes need. The CRM client is behind the trait so tests
/// can serve the routes against a scripted fake.
pub struct App {
    pub db: Database,
    pub crm: Arc<dyn CrmApi>,
    pub config: CrmConfig,
    pub sync: sync::SyncEngine,
}

pub fn handle(mut req: Request, app: &App) -> ResultResp {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let query = parse_query(&req);
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method.as_str(), segments.as_slice()) {
        // --- leads ---
        ("POST", ["leads"]) => {
            let body = read_json_body(&mut req)?;
            let new = NewLead {
                name: required_str(&body, "name")?.to_string(),
                email: required_str(&body, "email")?.to_string(),
                phone: opt_str(&body, "phone"),
                subject: opt_str(&body, "subject"),
                message: opt_str(&body, "message"),
                source: opt_str(&body, "source")
                    .unwrap_or_else(|| "website_contact_form".to_string()),
            };
            let lead = leads::create_lead(&app.db, &new)?;
            json_status(201, &lead)
        }

        ("GET", ["leads", "stats"]) => {
            let counts = leads::count_by_status(&app.db)?;
            let counts: Vec<Value> = counts
                .into_iter()
                .map(|(status, count)| json!({ "status": status, "count": count }))
                .collect();
            json_response(&counts)
        }

        ("GET", ["leads"]) => {
            let limit = query_usize(&query, "limit", 50);
            let leads = leads::list_leads(&app.db, limit)?;
            json_response(&leads)
        }

        ("GET", ["leads", id]) => {
            let lead = leads::get_lead(&app.db, parse_id(id)?)?;
            json_response(&lead)
        }

        ("POST", ["leads", id, "status"]) => {
            let lead_id = parse_id(id)?;
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let new_status = required_str(&body, "status")?;
            let note = opt_str(&body, "note");

            let lead = leads::change_status(&app.db, lead_id, new_status, &actor)?;

            // Best-effort push: a CRM failure is reported in the body, never
            // fails the local status change.
            let push = if lead.external_id.is_some() {
                Some(sync::push_lead(
                    &app.db,
                    app.crm.as_ref(),
                    lead_id,
                    note.as_deref(),
                    actor.id,
                )?)
            } else {
                None
            };

            // Reload: a successful push stamps sync metadata on the lead.
            let lead = leads::get_lead(&app.db, lead_id)?;
            json_response(&json!({ "lead": lead, "push": push }))
        }

        ("POST", ["leads", id, "assign"]) => {
            let lead_id = parse_id(id)?;
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let agent_id = required_i64(&body, "agent_id")?;
            let agent_name = required_str(&body, "agent_name")?;
            let lead = leads::assign_lead(&app.db, lead_id, agent_id, agent_name, &actor)?;
            json_response(&lead)
        }

        ("POST", ["leads", id, "notes"]) => {
            let lead_id = parse_id(id)?;
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let lead = leads::add_note(&app.db, lead_id, required_str(&body, "note")?, &actor)?;
            json_response(&lead)
        }

        ("POST", ["leads", id, "calls"]) => {
            let lead_id = parse_id(id)?;
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let lead = leads::log_call(&app.db, lead_id, required_str(&body, "summary")?, &actor)?;
            json_response(&lead)
        }

        ("POST", ["leads", id, "emails"]) => {
            let lead_id = parse_id(id)?;
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let lead =
                leads::log_email(&app.db, lead_id, required_str(&body, "subject")?, &actor)?;
            json_response(&lead)
        }

        ("POST", ["leads", id, "interests"]) => {
            let lead_id = parse_id(id)?;
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let note = opt_str(&body, "note");
            let lead = leads::add_property_interest(
                &app.db,
                lead_id,
                required_str(&body, "property_ref")?,
                note.as_deref(),
                &actor,
            )?;
            json_response(&lead)
        }

        ("POST", ["leads", id, "viewings"]) => {
            let lead_id = parse_id(id)?;
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let new = NewViewing {
                property_ref: opt_str(&body, "property_ref").unwrap_or_default(),
                scheduled_for: opt_str(&body, "scheduled_for")
                    .as_deref()
                    .and_then(parse_datetime),
            };
            let (lead, viewing_id) = leads::schedule_viewing(&app.db, lead_id, &new, &actor)?;
            json_status(201, &json!({ "lead": lead, "viewing_id": viewing_id }))
        }

        ("POST", ["leads", id, "viewings", vid, "complete"]) => {
            let (lead_id, viewing_id) = (parse_id(id)?, parse_id(vid)?);
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let outcome = opt_str(&body, "outcome");
            let notes = opt_str(&body, "notes");
            let lead = leads::complete_viewing(
                &app.db,
                lead_id,
                viewing_id,
                outcome.as_deref(),
                notes.as_deref(),
                &actor,
            )?;
            json_response(&lead)
        }

        ("POST", ["leads", id, "viewings", vid, "cancel"]) => {
            let (lead_id, viewing_id) = (parse_id(id)?, parse_id(vid)?);
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let reason = opt_str(&body, "reason");
            let lead = leads::cancel_viewing(
                &app.db,
                lead_id,
                viewing_id,
                reason.as_deref(),
                &actor,
            )?;
            json_response(&lead)
        }

        ("POST", ["leads", id, "export"]) => {
            let lead_id = parse_id(id)?;
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let report = sync::export_lead(&app.db, app.crm.as_ref(), lead_id, actor.id)?;
            json_response(&report)
        }

        // --- sync ---
        ("POST", ["sync", "pull"]) => {
            let body = read_json_body(&mut req)?;
            let actor = actor_from(&body);
            let outcome = app.sync.run_pull(
                &app.db,
                app.crm.as_ref(),
                app.config.pull_page_size,
                actor.id,
            )?;
            json_response(&json!({
                "run_id": outcome.run_id,
                "summary": outcome.summary,
                "errors": outcome.errors,
            }))
        }

        ("GET", ["sync", "runs"]) => {
            let kind = match query.get("kind") {
                Some(k) => Some(SyncKind::parse(k)?),
                None => None,
            };
            let status = match query.get("status") {
                Some(s) => Some(SyncRunStatus::parse(s)?),
                None => None,
            };
            let limit = query_usize(&query, "limit", 20);
            let runs = sync_runs::recent_runs(&app.db, kind, status, limit)?;
            json_response(&runs)
        }

        _ => Err(ServerError::NotFound),
    }
}

// --- request parsing helpers ---

fn parse_query(req: &Request) -> HashMap<String, String> {
    let mut map = HashMap::new();

    if let Some(q) = req.uri().query() {
        for pair in q.split('&') {
            let mut parts = pair.splitn(2, '=');
            if let (Some(k), Some(v)) = (parts.next(), parts.next()) {
                map.insert(k.to_string(), v.to_string());
            }
        }
    }

    map
}

fn query_usize(query: &HashMap<String, String>, key: &str, default: usize) -> usize {
    query
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_id(segment: &str) -> Result<i64, ServerError> {
    segment
        .parse()
        .map_err(|_| ServerError::Validation(format!("invalid id: {segment}")))
}

/// Reads the request body as a JSON object. An empty body is treated as `{}`
/// so routes with all-optional fields accept bare POSTs.
fn read_json_body(req: &mut Request) -> Result<Value, ServerError> {
    let mut buf = String::new();
    req.body_mut()
        .reader()
        .read_to_string(&mut buf)
        .map_err(|e| ServerError::Validation(format!("unreadable request body: {e}")))?;

    if buf.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&buf)
        .map_err(|e| ServerError::Validation(format!("malformed JSON body: {e}")))
}

fn opt_str(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required_str<'a>(body: &'a Value, key: &str) -> Result<&'a str, ServerError> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ServerError::Validation(format!("{key} is required")))
}

fn required_i64(body: &Value, key: &str) -> Result<i64, ServerError> {
    body.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| ServerError::Validation(format!("{key} is required")))
}

fn actor_from(body: &Value) -> Actor {
    Actor {
        id: body.get("actor_id").and_then(Value::as_i64),
        name: opt_str(body, "actor_name"),
    }
}

/// Accepts both ISO-ish and space-separated date/time text.
fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .ok()
}
