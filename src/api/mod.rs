//! REST API module

pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;

pub use routes::{AppState, create_router};
pub use server::serve;
