use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod reset;
pub mod services;


pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::public_routes())
        .merge(handlers::member_routes())
        .merge(handlers::admin_routes())
}
