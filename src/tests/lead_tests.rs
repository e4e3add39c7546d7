use crate::db::leads;
use crate::domain::activity::ActivityKind;
use crate::domain::lead::{Actor, LeadStatus, NewLead};
use crate::domain::viewing::{NewViewing, ViewingStatus};
use crate::errors::ServerError;
use crate::tests::utils::init_test_db;
use chrono::{NaiveDate, NaiveDateTime};

fn jane() -> NewLead {
    NewLead {
        name: "Jane Doe".to_string(),
        email: "jane@example.com".to_string(),
        phone: None,
        subject: None,
        message: None,
        source: "website_contact_form".to_string(),
    }
}

fn agent() -> Actor {
    Actor::new(10, "Agent Smith")
}

fn viewing_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 9, 4)
        .unwrap()
        .and_hms_opt(14, 0, 0)
        .unwrap()
}

#[test]
fn new_lead_starts_in_new_with_one_created_activity() {
    let db = init_test_db("lead_create");

    let lead = leads::create_lead(&db, &jane()).unwrap();

    assert_eq!(lead.status, LeadStatus::New);
    assert_eq!(lead.activities.len(), 1);
    assert_eq!(lead.activities[0].kind, ActivityKind::LeadCreated);
    assert!(!lead.synced_to_external);
    assert_eq!(lead.external_id, None);
}

#[test]
fn create_lead_rejects_missing_or_malformed_input() {
    let db = init_test_db("lead_create_invalid");

    let mut no_email = jane();
    no_email.email = String::new();
    assert!(matches!(
        leads::create_lead(&db, &no_email),
        Err(ServerError::Validation(_))
    ));

    let mut bad_email = jane();
    bad_email.email = "not-an-email".to_string();
    assert!(matches!(
        leads::create_lead(&db, &bad_email),
        Err(ServerError::Validation(_))
    ));
}

#[test]
fn ledger_grows_by_one_per_operation_and_never_rewrites() {
    let db = init_test_db("lead_ledger");
    let lead = leads::create_lead(&db, &jane()).unwrap();
    let actor = agent();

    // Oldest entry, as it stands now.
    let created = lead.activities.last().unwrap().clone();
    let before = lead.activities.len();

    leads::change_status(&db, lead.id, "contacted", &actor).unwrap();
    leads::add_note(&db, lead.id, "Spoke on the phone", &actor).unwrap();
    leads::log_call(&db, lead.id, "Intro call, 10 min", &actor).unwrap();
    leads::log_email(&db, lead.id, "Listing suggestions", &actor).unwrap();
    let lead = leads::assign_lead(&db, lead.id, 10, "Agent Smith", &actor).unwrap();

    assert_eq!(lead.activities.len(), before + 5);

    // The original entry is still there, untouched, at the tail
    // (activities load most-recent-first).
    let oldest = lead.activities.last().unwrap();
    assert_eq!(oldest.id, created.id);
    assert_eq!(oldest.kind, ActivityKind::LeadCreated);
    assert_eq!(oldest.description, created.description);
    assert_eq!(oldest.created_at, created.created_at);
}

#[test]
fn unknown_status_is_rejected_and_nothing_changes() {
    let db = init_test_db("lead_bad_status");
    let lead = leads::create_lead(&db, &jane()).unwrap();

    for bad in ["closed", "WON", "", "viewing "] {
        match leads::change_status(&db, lead.id, bad, &agent()) {
            Err(ServerError::Validation(_)) => {}
            other => panic!("expected validation error for {bad:?}, got {other:?}"),
        }
    }

    let unchanged = leads::get_lead(&db, lead.id).unwrap();
    assert_eq!(unchanged.status, LeadStatus::New);
    assert_eq!(unchanged.activities.len(), lead.activities.len());
}

#[test]
fn change_status_records_old_and_new_values() {
    let db = init_test_db("lead_status_change");
    let lead = leads::create_lead(&db, &jane()).unwrap();

    let lead = leads::change_status(&db, lead.id, "qualified", &agent()).unwrap();

    assert_eq!(lead.status, LeadStatus::Qualified);
    let activity = &lead.activities[0];
    assert_eq!(activity.kind, ActivityKind::StatusChange);
    assert_eq!(activity.metadata["from"], "new");
    assert_eq!(activity.metadata["to"], "qualified");
}

#[test]
fn change_status_on_missing_lead_is_not_found() {
    let db = init_test_db("lead_status_missing");
    assert!(matches!(
        leads::change_status(&db, 999, "contacted", &agent()),
        Err(ServerError::NotFound)
    ));
}

#[test]
fn reassignment_keeps_the_previous_agent_for_audit() {
    let db = init_test_db("lead_assign");
    let lead = leads::create_lead(&db, &jane()).unwrap();
    let admin = Actor::new(1, "Admin");

    let lead = leads::assign_lead(&db, lead.id, 10, "Agent A", &admin).unwrap();
    assert_eq!(lead.assigned_to, Some(10));
    assert_eq!(lead.activities[0].kind, ActivityKind::Assigned);
    assert!(lead.activities[0].description.starts_with("Assigned to"));
    assert!(lead.activities[0].metadata.get("previous_agent").is_none());

    let lead = leads::assign_lead(&db, lead.id, 11, "Agent B", &admin).unwrap();
    assert_eq!(lead.assigned_to, Some(11));
    let reassigned = &lead.activities[0];
    assert!(reassigned.description.starts_with("Reassigned to"));
    assert_eq!(reassigned.metadata["previous_agent"], 10);

    // Two assigned activities total, audit trail intact.
    let assigned_count = lead
        .activities
        .iter()
        .filter(|a| a.kind == ActivityKind::Assigned)
        .count();
    assert_eq!(assigned_count, 2);
}

#[test]
fn reassigning_to_the_same_agent_still_logs() {
    let db = init_test_db("lead_assign_same");
    let lead = leads::create_lead(&db, &jane()).unwrap();
    let admin = Actor::new(1, "Admin");

    leads::assign_lead(&db, lead.id, 10, "Agent A", &admin).unwrap();
    let lead = leads::assign_lead(&db, lead.id, 10, "Agent A", &admin).unwrap();

    let assigned_count = lead
        .activities
        .iter()
        .filter(|a| a.kind == ActivityKind::Assigned)
        .count();
    assert_eq!(assigned_count, 2);
}

#[test]
fn property_interest_is_deduplicated_by_property() {
    let db = init_test_db("lead_interest");
    let lead = leads::create_lead(&db, &jane()).unwrap();

    leads::add_property_interest(&db, lead.id, "MLS-1001", Some("sea view"), &agent()).unwrap();
    let lead =
        leads::add_property_interest(&db, lead.id, "MLS-1001", Some("asked again"), &agent())
            .unwrap();

    assert_eq!(lead.interested_properties.len(), 1);
    assert_eq!(
        lead.interested_properties[0].note.as_deref(),
        Some("asked again")
    );
    // But the ledger keeps both expressions of interest.
    let interest_count = lead
        .activities
        .iter()
        .filter(|a| a.kind == ActivityKind::PropertyInterested)
        .count();
    assert_eq!(interest_count, 2);
}

#[test]
fn viewing_must_have_a_date() {
    let db = init_test_db("lead_viewing_no_date");
    let lead = leads::create_lead(&db, &jane()).unwrap();

    let new = NewViewing {
        property_ref: "MLS-1001".to_string(),
        scheduled_for: None,
    };
    assert!(matches!(
        leads::schedule_viewing(&db, lead.id, &new, &agent()),
        Err(ServerError::Validation(_))
    ));
}

#[test]
fn completed_viewing_is_terminal() {
    let db = init_test_db("lead_viewing_complete");
    let lead = leads::create_lead(&db, &jane()).unwrap();
    let new = NewViewing {
        property_ref: "MLS-1001".to_string(),
        scheduled_for: Some(viewing_date()),
    };
    let (_, viewing_id) = leads::schedule_viewing(&db, lead.id, &new, &agent()).unwrap();

    let lead = leads::complete_viewing(
        &db,
        lead.id,
        viewing_id,
        Some("interested"),
        Some("wants a second visit"),
        &agent(),
    )
    .unwrap();

    let viewing = lead.viewing(viewing_id).unwrap();
    assert_eq!(viewing.status, ViewingStatus::Completed);
    assert_eq!(viewing.outcome.as_deref(), Some("interested"));
    assert!(viewing.completed_at.is_some());

    // Neither closing operation works a second time.
    assert!(matches!(
        leads::complete_viewing(&db, lead.id, viewing_id, None, None, &agent()),
        Err(ServerError::InvalidState(_))
    ));
    assert!(matches!(
        leads::cancel_viewing(&db, lead.id, viewing_id, Some("mistake"), &agent()),
        Err(ServerError::InvalidState(_))
    ));
}

#[test]
fn cancelled_viewing_is_terminal() {
    let db = init_test_db("lead_viewing_cancel");
    let lead = leads::create_lead(&db, &jane()).unwrap();
    let new = NewViewing {
        property_ref: "MLS-2002".to_string(),
        scheduled_for: Some(viewing_date()),
    };
    let (_, viewing_id) = leads::schedule_viewing(&db, lead.id, &new, &agent()).unwrap();

    let lead =
        leads::cancel_viewing(&db, lead.id, viewing_id, Some("client unavailable"), &agent())
            .unwrap();
    assert_eq!(
        lead.viewing(viewing_id).unwrap().status,
        ViewingStatus::Cancelled
    );

    assert!(matches!(
        leads::complete_viewing(&db, lead.id, viewing_id, None, None, &agent()),
        Err(ServerError::InvalidState(_))
    ));
}

#[test]
fn closing_a_missing_viewing_is_not_found() {
    let db = init_test_db("lead_viewing_missing");
    let lead = leads::create_lead(&db, &jane()).unwrap();

    assert!(matches!(
        leads::complete_viewing(&db, lead.id, 42, None, None, &agent()),
        Err(ServerError::NotFound)
    ));
}

#[test]
fn mark_synced_links_and_logs() {
    let db = init_test_db("lead_mark_synced");
    let lead = leads::create_lead(&db, &jane()).unwrap();

    let lead = leads::mark_synced(&db, lead.id, 777).unwrap();

    assert!(lead.synced_to_external);
    assert_eq!(lead.external_id, Some(777));
    assert!(lead.synced_at.is_some());
    assert_eq!(lead.activities[0].kind, ActivityKind::SyncedToExternal);

    let found = leads::find_id_by_external_id(&db, 777).unwrap();
    assert_eq!(found, Some(lead.id));
}
