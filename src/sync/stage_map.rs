// src/sync/stage_map.rs

use crate::domain::lead::LeadStatus;

/// Remote pipeline stage name → local status. The table is fixed; a stage
/// name outside it lands on `new` so an import never fails on an unknown
/// pipeline configuration.
pub fn status_for_stage(stage_name: &str) -> LeadStatus {
    match stage_name {
        "New Lead" => LeadStatus::New,
        "Contacted" => LeadStatus::Contacted,
        "Qualified" => LeadStatus::Qualified,
        "Viewing Scheduled" => LeadStatus::Viewing,
        "Negotiation" => LeadStatus::Negotiating,
        "Won" => LeadStatus::Won,
        "Lost" => LeadStatus::Lost,
        _ => LeadStatus::New,
    }
}

/// Local status → remote stage name. Total over the enum, so push always has
/// a name to resolve; whether the remote actually has that stage is the
/// client's `get_stage_id` problem.
pub fn stage_for_status(status: LeadStatus) -> &'static str {
    match status {
        LeadStatus::New => "New Lead",
        LeadStatus::Contacted => "Contacted",
        LeadStatus::Qualified => "Qualified",
        LeadStatus::Viewing => "Viewing Scheduled",
        LeadStatus::Negotiating => "Negotiation",
        LeadStatus::Won => "Won",
        LeadStatus::Lost => "Lost",
    }
}
