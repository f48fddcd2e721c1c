//! crates/engagement_core/src/ports.rs
//!
//! Defines the service contracts (traits) the engagement engine depends on.
//! These traits form the boundary of the hexagonal architecture, keeping the
//! engine independent of the database, the activity source and the delivery
//! channels.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ActivitySnapshot, Channel, ClientProfile, ClientReminderSettings, DeliveryResult,
    ReminderDispatch, ReminderSettingsUpdate, Trigger,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Source unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Persistence for settings, triggers and the dispatch ledger.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    // --- Settings ---
    async fn get_settings(&self, client_id: Uuid) -> PortResult<Option<ClientReminderSettings>>;

    /// Returns the client's settings, creating the defaults first if none exist.
    async fn get_or_create_settings(
        &self,
        client_id: Uuid,
        coach_id: Uuid,
    ) -> PortResult<ClientReminderSettings>;

    async fn save_settings(&self, settings: &ClientReminderSettings) -> PortResult<()>;

    /// Merges a validated partial update into the client's settings as one
    /// atomic read-modify-write, creating the defaults first if none exist.
    async fn update_settings(
        &self,
        client_id: Uuid,
        coach_id: Uuid,
        update: &ReminderSettingsUpdate,
        now: DateTime<Utc>,
    ) -> PortResult<ClientReminderSettings>;

    // --- Triggers ---
    /// Replaces the client's open trigger set. Triggers already stored under
    /// the same id are kept as they are; open triggers missing from `triggers`
    /// are marked superseded.
    async fn record_triggers(&self, client_id: Uuid, triggers: &[Trigger]) -> PortResult<()>;

    async fn open_triggers(&self, client_id: Uuid) -> PortResult<Vec<Trigger>>;

    async fn get_trigger(&self, trigger_id: Uuid) -> PortResult<Trigger>;

    // --- Dispatch ledger ---
    async fn record_dispatch(&self, dispatch: &ReminderDispatch) -> PortResult<()>;

    async fn dispatches_for_trigger(&self, trigger_id: Uuid) -> PortResult<Vec<ReminderDispatch>>;

    /// Counts `sent` rows for the client with `start <= sent_at < end`.
    async fn count_sent_between(
        &self,
        client_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<u32>;

    /// Newest first.
    async fn recent_dispatches(
        &self,
        client_id: Uuid,
        limit: u32,
    ) -> PortResult<Vec<ReminderDispatch>>;
}

/// Read access to the client roster owned by the rest of the platform.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn get_client(&self, client_id: Uuid) -> PortResult<ClientProfile>;

    async fn list_active_clients(&self) -> PortResult<Vec<ClientProfile>>;
}

/// Read access to data logs, sessions, goals and plans.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Loads activity entries at or after `since`, plus the client's goals and plans.
    async fn load_activity(
        &self,
        client_id: Uuid,
        since: DateTime<Utc>,
    ) -> PortResult<ActivitySnapshot>;
}

/// Outbound delivery. Failures are reported in the result, not as errors.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, client_id: Uuid, channel: Channel, message: &str) -> DeliveryResult;
}
