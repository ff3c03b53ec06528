//! HTTP API through which session management starts and ends reporting.

pub mod routes;
pub mod web_server;

pub use web_server::WebServer;
