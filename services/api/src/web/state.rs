//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use engagement_core::ports::{ClientDirectory, ReminderStore};
use engagement_core::scheduler::ReminderScheduler;

use crate::config::Config;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReminderStore>,
    pub directory: Arc<dyn ClientDirectory>,
    pub scheduler: Arc<ReminderScheduler>,
    pub config: Arc<Config>,
}
