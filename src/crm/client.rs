// src/crm/client.rs
use crate::config::CrmConfig;
use crate::crm::error::CrmError;
use crate::crm::retry::RetryPolicy;
use crate::crm::session::{CrmAuthenticator, CrmSession, CrmSessionManager};
use crate::crm::{CrmApi, NewRemoteLead, RemoteLead, RemoteLeadPatch};
use chrono::NaiveDateTime;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::time::Duration;

const LEAD_MODEL: &str = "crm.lead";
const STAGE_MODEL: &str = "crm.stage";
const SOURCE_MODEL: &str = "utm.source";

const REMOTE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const LEAD_FIELDS: &[&str] = &[
    "name",
    "contact_name",
    "email_from",
    "phone",
    "description",
    "stage_id",
    "source_id",
    "write_date",
    "x_budget_range",
    "x_preferred_region",
    "x_property_interest",
    "x_comm_pref",
];

/// Typed RPC calls against the external CRM. Every call goes through the
/// session manager (one authenticated session, TTL + single flight) and the
/// retry policy (transient failures only).
pub struct CrmClient {
    http: Client,
    config: CrmConfig,
    sessions: CrmSessionManager,
    retry: RetryPolicy,
}

impl CrmClient {
    pub fn new(config: CrmConfig) -> Result<Self, CrmError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CrmError::Structural(format!("building HTTP client: {e}")))?;

        let sessions = CrmSessionManager::new(
            Box::new(HttpAuthenticator {
                http: http.clone(),
                config: config.clone(),
            }),
            Duration::from_secs(config.session_ttl_secs.max(0) as u64),
        );

        Ok(Self {
            http,
            config,
            sessions,
            retry: RetryPolicy::default(),
        })
    }

    /// Generic RPC call: `{model, method, args, kwargs}` → result payload.
    /// Transient transport failures are retried; an auth rejection drops the
    /// cached session so the retry (or the next call) logs in again.
    fn call(&self, model: &str, method: &str, args: Value, kwargs: Value) -> Result<Value, CrmError> {
        let what = format!("CRM {model}.{method}");
        self.retry.run(&what, || {
            let session = self.sessions.ensure_authenticated()?;
            match self.call_once(&session, model, method, &args, &kwargs) {
                Err(e @ CrmError::Auth(_)) => {
                    self.sessions.invalidate();
                    Err(e)
                }
                other => other,
            }
        })
    }

    fn call_once(
        &self,
        session: &CrmSession,
        model: &str,
        method: &str,
        args: &Value,
        kwargs: &Value,
    ) -> Result<Value, CrmError> {
        let body = json!({
            "model": model,
            "method": method,
            "args": args,
            "kwargs": kwargs,
        });

        let response = self
            .http
            .post(format!("{}/rpc/call", self.config.base_url))
            .header("X-Session-Id", &session.session_id)
            .json(&body)
            .send()
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CrmError::Auth(format!("remote rejected session: {status}")));
        }
        if status.is_server_error() {
            return Err(CrmError::Transient(format!("remote returned {status}")));
        }
        if !status.is_success() {
            return Err(CrmError::Structural(format!("remote returned {status}")));
        }

        let payload: Value = response
            .json()
            .map_err(|e| CrmError::Structural(format!("malformed response body: {e}")))?;

        if let Some(err) = payload.get("error") {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown remote error");
            return Err(CrmError::Structural(format!(
                "remote error {code}: {message}"
            )));
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| CrmError::Structural("response missing result field".into()))
    }
}

impl CrmApi for CrmClient {
    fn fetch_leads_changed_since(
        &self,
        since: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<RemoteLead>, CrmError> {
        let since_text = since.format(REMOTE_DATE_FORMAT).to_string();
        let result = self.call(
            LEAD_MODEL,
            "search_read",
            json!([[["write_date", ">", since_text]]]),
            json!({ "fields": LEAD_FIELDS, "limit": limit, "order": "write_date asc" }),
        )?;

        let records = result
            .as_array()
            .ok_or_else(|| CrmError::Structural("search_read did not return a list".into()))?;
        records.iter().map(parse_remote_lead).collect()
    }

    fn read_lead(&self, external_id: i64) -> Result<Option<RemoteLead>, CrmError> {
        let result = self.call(
            LEAD_MODEL,
            "read",
            json!([[external_id]]),
            json!({ "fields": LEAD_FIELDS }),
        )?;
        parse_read_result(&result)
    }

    fn create_lead(&self, new: &NewRemoteLead) -> Result<i64, CrmError> {
        let source_id = self.get_or_create_source(&new.source_name)?;
        let result = self.call(
            LEAD_MODEL,
            "create",
            json!([{
                "name": new.name,
                "contact_name": new.contact_name,
                "email_from": new.email,
                "phone": new.phone,
                "description": new.description,
                "source_id": source_id,
            }]),
            json!({}),
        )?;
        result
            .as_i64()
            .ok_or_else(|| CrmError::Structural("create did not return a record id".into()))
    }

    fn update_lead(&self, external_id: i64, patch: &RemoteLeadPatch) -> Result<(), CrmError> {
        let mut vals = serde_json::Map::new();
        if let Some(stage_id) = patch.stage_id {
            vals.insert("stage_id".into(), json!(stage_id));
        }
        if let Some(description) = &patch.description {
            vals.insert("description".into(), json!(description));
        }
        if vals.is_empty() {
            return Ok(());
        }

        self.call(
            LEAD_MODEL,
            "write",
            json!([[external_id], Value::Object(vals)]),
            json!({}),
        )?;
        Ok(())
    }

    fn get_stage_id(&self, stage_name: &str) -> Result<i64, CrmError> {
        let result = self.call(
            STAGE_MODEL,
            "search_read",
            json!([[["name", "=", stage_name]]]),
            json!({ "fields": ["id"], "limit": 1 }),
        )?;
        match result.as_array().and_then(|a| a.first()) {
            Some(record) => record
                .get("id")
                .and_then(Value::as_i64)
                .ok_or_else(|| CrmError::Structural("stage record missing id".into())),
            None => Err(CrmError::UnmappedStage(stage_name.to_string())),
        }
    }

    fn get_or_create_source(&self, name: &str) -> Result<i64, CrmError> {
        let found = self.call(
            SOURCE_MODEL,
            "search_read",
            json!([[["name", "=", name]]]),
            json!({ "fields": ["id"], "limit": 1 }),
        )?;
        if let Some(id) = found
            .as_array()
            .and_then(|a| a.first())
            .and_then(|r| r.get("id"))
            .and_then(Value::as_i64)
        {
            return Ok(id);
        }

        let created = self.call(SOURCE_MODEL, "create", json!([{ "name": name }]), json!({}))?;
        created
            .as_i64()
            .ok_or_else(|| CrmError::Structural("source create did not return an id".into()))
    }
}

/// Login transport, owned by the session manager.
struct HttpAuthenticator {
    http: Client,
    config: CrmConfig,
}

impl CrmAuthenticator for HttpAuthenticator {
    fn login(&self) -> Result<CrmSession, CrmError> {
        let body = json!({
            "database": self.config.database,
            "login": self.config.login,
            "password": self.config.password,
        });

        let response = self
            .http
            .post(format!("{}/session/authenticate", self.config.base_url))
            .json(&body)
            .send()
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrmError::Auth(format!("login returned {status}")));
        }

        let payload: Value = response
            .json()
            .map_err(|e| CrmError::Auth(format!("malformed login response: {e}")))?;
        let result = payload
            .get("result")
            .ok_or_else(|| CrmError::Auth("login response missing result".into()))?;

        let session_id = result
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| CrmError::Auth("login response missing session_id".into()))?;
        let uid = result
            .get("uid")
            .and_then(Value::as_i64)
            .ok_or_else(|| CrmError::Auth("login response missing uid".into()))?;

        Ok(CrmSession {
            session_id: session_id.to_string(),
            uid,
        })
    }
}

/// Only timeouts and connection failures are worth retrying; anything else
/// (bad URL, redirect policy, body encoding) will fail the same way again.
fn classify_transport_error(e: reqwest::Error) -> CrmError {
    if e.is_timeout() || e.is_connect() {
        CrmError::Transient(format!("transport: {e}"))
    } else {
        CrmError::Structural(format!("request failed: {e}"))
    }
}

/// A `read` result must be a list; an empty one means the record is gone,
/// anything else is a malformed response rather than a missing record.
fn parse_read_result(result: &Value) -> Result<Option<RemoteLead>, CrmError> {
    let records = result
        .as_array()
        .ok_or_else(|| CrmError::Structural("read did not return a list".into()))?;
    match records.first() {
        Some(record) => parse_remote_lead(record).map(Some),
        None => Ok(None),
    }
}

fn parse_remote_lead(record: &Value) -> Result<RemoteLead, CrmError> {
    let id = record
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| CrmError::Structural("lead record missing id".into()))?;

    Ok(RemoteLead {
        id,
        name: text_field(record, "name"),
        contact_name: text_field(record, "contact_name"),
        email: text_field(record, "email_from"),
        phone: text_field(record, "phone"),
        description: text_field(record, "description"),
        stage_name: relation_name(record, "stage_id"),
        write_date: text_field(record, "write_date")
            .and_then(|s| NaiveDateTime::parse_from_str(&s, REMOTE_DATE_FORMAT).ok()),
        budget_range: text_field(record, "x_budget_range"),
        preferred_region: text_field(record, "x_preferred_region"),
        property_interest: text_field(record, "x_property_interest"),
        comm_pref: text_field(record, "x_comm_pref"),
    })
}

/// The remote encodes empty fields as `false` rather than null.
fn text_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Relational fields arrive as `[id, "Display Name"]` pairs (or `false`).
fn relation_name(record: &Value, key: &str) -> Option<String> {
    match record.get(key) {
        Some(Value::Array(pair)) => pair.get(1).and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
