//! API module for the insight HTTP server

pub mod routes;
pub mod server;

pub use server::{build_router, ApiServer, ApiServerConfig};
