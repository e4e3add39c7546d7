use crate::config::CrmConfig;
use crate::crm::CrmClient;
use crate::db::connection::{init_db, Database};
use crate::responses::error_to_response;
use crate::router::{handle, App};
use astra::Server;
use std::net::SocketAddr;
use std::sync::Arc;

mod config;
mod crm;
mod db;
mod domain;
mod errors;
mod responses;
mod router;
mod sync;

#[cfg(test)]
mod tests;

fn main() {
    // 1️⃣ Create the database handle
    let db = Database::new("leadflow.sqlite3");

    // 2️⃣ Initialize database from schema.sql
    if let Err(e) = init_db(&db, "sql/schema.sql") {
        eprintln!("❌ Database initialization failed: {e}");
        std::process::exit(1);
    }

    // 3️⃣ Build the CRM client from environment config
    let config = CrmConfig::from_env();
    let crm = match CrmClient::new(config.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("❌ CRM client setup failed: {e}");
            std::process::exit(1);
        }
    };

    let app = App {
        db,
        crm,
        config,
        sync: sync::SyncEngine::new(),
    };

    // 4️⃣ Start the server
    let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
    println!("Starting server at http://{addr}");

    let server = Server::bind(&addr).max_workers(8);

    let result = server.serve(move |req, _info| match handle(req, &app) {
        Ok(resp) => resp,
        Err(err) => error_to_response(err),
    });

    if let Err(e) = result {
        eprintln!("Server ended with error: {e}");
    }

    println!("Server shut down cleanly.");
}
