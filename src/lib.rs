//! Image metadata API with delegated uploads and downloads.
//!
//! Clients upload and download image payloads directly against an object
//! store using short-lived signed credentials; this crate issues those
//! credentials and keeps the metadata records, listable per owner with
//! opaque pagination tokens.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use state::AppState;

/// Build the application router with its state attached.
pub fn build_app(state: AppState) -> Router {
    let max_file_size = state.max_file_size;
    routes::routes::routes(max_file_size).with_state(state)
}
