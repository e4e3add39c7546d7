pub mod activity;
pub mod lead;
pub mod viewing;

pub use activity::{Activity, ActivityKind};
pub use lead::{Actor, Lead, LeadStatus, NewLead, PropertyInterest};
pub use viewing::{NewViewing, Viewing, ViewingStatus};
