pub mod rest;
pub mod state;

pub use rest::{router, ApiDoc};
pub use state::AppState;
