// HTTP surface: health check and sheet upload.

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
