pub mod connection;
pub mod leads;
pub mod sync_runs;

pub use connection::Database;
