//! Admin API and process wiring for the rotor rotation engine.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;
