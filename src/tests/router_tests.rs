use crate::config::CrmConfig;
use crate::db::leads;
use crate::domain::lead::NewLead;
use crate::responses::error_to_response;
use crate::router::{handle, App};
use crate::sync::SyncEngine;
use crate::tests::utils::{init_test_db, remote_lead, FakeCrm};
use astra::{Body, Response};
use http::{Method, Request};
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;

/// An App wired to a scripted CRM. The fake is returned alongside so tests
/// can assert on the remote traffic it saw.
fn test_app(name: &str, crm: FakeCrm) -> (App, Arc<FakeCrm>) {
    let crm = Arc::new(crm);
    let app = App {
        db: init_test_db(name),
        crm: crm.clone(),
        config: CrmConfig::default(),
        sync: SyncEngine::new(),
    };
    (app, crm)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn body_json(resp: Response) -> Value {
    let mut body = String::new();
    resp.into_body().reader().read_to_string(&mut body).unwrap();
    serde_json::from_str(&body).unwrap()
}

#[test]
fn create_lead_returns_201_with_the_new_lead() {
    let (app, _) = test_app("router_create", FakeCrm::new(vec![]));

    let req = post(
        "/leads",
        json!({ "name": "Jane Doe", "email": "jane@example.com" }),
    );
    let resp = handle(req, &app).expect("Failed to handle request");

    assert_eq!(resp.status(), 201);
    let lead = body_json(resp);
    assert_eq!(lead["name"], "Jane Doe");
    assert_eq!(lead["status"], "new");
    assert_eq!(lead["source"], "website_contact_form");
    assert_eq!(lead["activities"].as_array().unwrap().len(), 1);
}

#[test]
fn create_lead_without_email_is_a_400() {
    let (app, _) = test_app("router_create_invalid", FakeCrm::new(vec![]));

    let req = post("/leads", json!({ "name": "Jane Doe" }));
    let err = handle(req, &app).unwrap_err();

    let resp = error_to_response(err);
    assert_eq!(resp.status(), 400);
    let body = body_json(resp);
    assert!(body["error"].as_str().unwrap().contains("email"));
}

#[test]
fn unknown_lead_is_a_404() {
    let (app, _) = test_app("router_missing", FakeCrm::new(vec![]));

    let err = handle(get("/leads/999"), &app).unwrap_err();
    assert_eq!(error_to_response(err).status(), 404);
}

#[test]
fn non_numeric_id_segment_is_a_400() {
    let (app, _) = test_app("router_bad_id", FakeCrm::new(vec![]));

    let err = handle(get("/leads/abc"), &app).unwrap_err();
    assert_eq!(error_to_response(err).status(), 400);
}

#[test]
fn unknown_route_is_a_404() {
    let (app, _) = test_app("router_unknown", FakeCrm::new(vec![]));

    let err = handle(get("/nope"), &app).unwrap_err();
    assert_eq!(error_to_response(err).status(), 404);
}

#[test]
fn list_leads_honors_the_limit_parameter() {
    let (app, _) = test_app("router_list", FakeCrm::new(vec![]));
    for i in 0..3 {
        let new = NewLead {
            name: format!("Lead {i}"),
            email: format!("lead{i}@example.com"),
            phone: None,
            subject: None,
            message: None,
            source: "website_contact_form".to_string(),
        };
        leads::create_lead(&app.db, &new).unwrap();
    }

    let resp = handle(get("/leads?limit=2"), &app).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(resp).as_array().unwrap().len(), 2);
}

#[test]
fn stats_counts_leads_per_status() {
    let (app, _) = test_app("router_stats", FakeCrm::new(vec![]));
    let new = NewLead {
        name: "Jane Doe".to_string(),
        email: "jane@example.com".to_string(),
        phone: None,
        subject: None,
        message: None,
        source: "website_contact_form".to_string(),
    };
    leads::create_lead(&app.db, &new).unwrap();

    let resp = handle(get("/leads/stats"), &app).unwrap();
    let stats = body_json(resp);
    let new_bucket = stats
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["status"] == "new")
        .expect("a bucket for status new");
    assert_eq!(new_bucket["count"], 1);
}

#[test]
fn status_change_on_a_linked_lead_reports_the_push() {
    let (app, crm) = test_app(
        "router_status_push",
        FakeCrm::new(vec![remote_lead(301, "Jane Doe", "jane@example.com", "New Lead")]),
    );
    let new = NewLead {
        name: "Jane Doe".to_string(),
        email: "jane@example.com".to_string(),
        phone: None,
        subject: None,
        message: None,
        source: "website_contact_form".to_string(),
    };
    let lead = leads::create_lead(&app.db, &new).unwrap();
    leads::mark_synced(&app.db, lead.id, 301).unwrap();

    let req = post(
        &format!("/leads/{}/status", lead.id),
        json!({ "status": "contacted", "actor_id": 1, "actor_name": "Admin" }),
    );
    let resp = handle(req, &app).unwrap();

    assert_eq!(resp.status(), 200);
    let body = body_json(resp);
    assert_eq!(body["lead"]["status"], "contacted");
    assert_eq!(body["push"]["result"], "pushed");

    // "Contacted" is stage 2 in the fake's table.
    let updates = crm.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.stage_id, Some(2));
}

#[test]
fn status_change_on_an_unlinked_lead_skips_the_push() {
    let (app, crm) = test_app("router_status_local", FakeCrm::new(vec![]));
    let new = NewLead {
        name: "Jane Doe".to_string(),
        email: "jane@example.com".to_string(),
        phone: None,
        subject: None,
        message: None,
        source: "website_contact_form".to_string(),
    };
    let lead = leads::create_lead(&app.db, &new).unwrap();

    let req = post(
        &format!("/leads/{}/status", lead.id),
        json!({ "status": "contacted" }),
    );
    let body = body_json(handle(req, &app).unwrap());

    assert_eq!(body["lead"]["status"], "contacted");
    assert!(body["push"].is_null());
    assert!(crm.updates.lock().unwrap().is_empty());
}

#[test]
fn completing_a_viewing_twice_is_a_409() {
    let (app, _) = test_app("router_viewing_conflict", FakeCrm::new(vec![]));
    let new = NewLead {
        name: "Jane Doe".to_string(),
        email: "jane@example.com".to_string(),
        phone: None,
        subject: None,
        message: None,
        source: "website_contact_form".to_string(),
    };
    let lead = leads::create_lead(&app.db, &new).unwrap();

    let req = post(
        &format!("/leads/{}/viewings", lead.id),
        json!({ "property_ref": "VILLA-7", "scheduled_for": "2026-09-01 10:00:00" }),
    );
    let resp = handle(req, &app).unwrap();
    assert_eq!(resp.status(), 201);
    let viewing_id = body_json(resp)["viewing_id"].as_i64().unwrap();

    let complete = |note: &str| {
        post(
            &format!("/leads/{}/viewings/{viewing_id}/complete", lead.id),
            json!({ "outcome": "interested", "notes": note }),
        )
    };
    handle(complete("first pass"), &app).unwrap();

    let err = handle(complete("again"), &app).unwrap_err();
    assert_eq!(error_to_response(err).status(), 409);
}

#[test]
fn sync_pull_route_runs_a_pull_and_records_it() {
    let (app, _) = test_app(
        "router_pull",
        FakeCrm::new(vec![remote_lead(401, "Ana Ruiz", "ana@example.com", "Contacted")]),
    );

    let resp = handle(post("/sync/pull", json!({ "actor_id": 7 })), &app).unwrap();
    assert_eq!(resp.status(), 200);
    let body = body_json(resp);
    assert_eq!(body["summary"]["created"], 1);
    assert_eq!(body["errors"].as_array().unwrap().len(), 0);

    let runs = body_json(handle(get("/sync/runs?kind=pull"), &app).unwrap());
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["status"], "completed");
    assert_eq!(runs[0]["triggered_by"], 7);
}

#[test]
fn sync_runs_rejects_an_unknown_kind_filter() {
    let (app, _) = test_app("router_runs_filter", FakeCrm::new(vec![]));

    let err = handle(get("/sync/runs?kind=sideways"), &app).unwrap_err();
    assert_eq!(error_to_response(err).status(), 400);
}

#[test]
fn export_route_returns_the_push_report() {
    let (app, crm) = test_app("router_export", FakeCrm::new(vec![]));
    let new = NewLead {
        name: "Jane Doe".to_string(),
        email: "jane@example.com".to_string(),
        phone: None,
        subject: None,
        message: None,
        source: "website_contact_form".to_string(),
    };
    let lead = leads::create_lead(&app.db, &new).unwrap();

    let req = post(&format!("/leads/{}/export", lead.id), json!({ "actor_id": 1 }));
    let body = body_json(handle(req, &app).unwrap());

    assert_eq!(body["result"], "pushed");
    assert_eq!(crm.created.lock().unwrap().len(), 1);
}
