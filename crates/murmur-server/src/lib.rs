pub mod error;
pub mod routes;
pub mod server;
pub mod transformer;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
