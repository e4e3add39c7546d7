mod lead_tests;
mod router_tests;
mod utils;
