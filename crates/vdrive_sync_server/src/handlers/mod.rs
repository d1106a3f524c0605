pub mod api;
mod error;
pub mod ws;

pub use api::{ApiState, api_routes};
pub use error::{ApiError, ErrorBody};
pub use ws::channel_routes;
