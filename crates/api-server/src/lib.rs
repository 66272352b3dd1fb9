//! REST API surface: serving, admin, and analytics endpoints with API-key
//! authentication and sliding-window rate limiting.

pub mod auth;
pub mod limit;
pub mod rest;
pub mod server;

pub use server::{build_router, ApiServer, AppState};
