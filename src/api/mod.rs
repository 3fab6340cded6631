//! HTTP surface for the kiosk frontend and the GPIO monitor.

mod error;
mod extract;
mod logging;
pub mod routes;

pub use error::ApiError;
pub use routes::{create_router, AppState};
