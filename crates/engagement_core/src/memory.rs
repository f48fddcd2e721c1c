//! crates/engagement_core/src/memory.rs
//!
//! In-memory implementations of every port. Used when the service runs
//! without a database, and by tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    ActivityEntry, ActivitySnapshot, Channel, ClientProfile, ClientReminderSettings,
    DeliveryResult, DispatchStatus, Goal, ReminderDispatch, ReminderSettingsUpdate, Trigger,
    WeeklyPlan,
};
use crate::ports::{
    ActivitySource, ClientDirectory, NotificationSender, PortError, PortResult, ReminderStore,
};

//=========================================================================================
// Reminder Store
//=========================================================================================

struct StoredTrigger {
    trigger: Trigger,
    open: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    settings: RwLock<HashMap<Uuid, ClientReminderSettings>>,
    triggers: RwLock<HashMap<Uuid, StoredTrigger>>,
    dispatches: RwLock<Vec<ReminderDispatch>>,
    reject_dispatches: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dispatch row, oldest first.
    pub async fn all_dispatches(&self) -> Vec<ReminderDispatch> {
        self.dispatches.read().await.clone()
    }

    /// While set, `record_dispatch` fails as if the ledger were unreachable.
    pub fn set_rejecting_dispatches(&self, rejecting: bool) {
        self.reject_dispatches.store(rejecting, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReminderStore for MemoryStore {
    async fn get_settings(&self, client_id: Uuid) -> PortResult<Option<ClientReminderSettings>> {
        Ok(self.settings.read().await.get(&client_id).cloned())
    }

    async fn get_or_create_settings(
        &self,
        client_id: Uuid,
        coach_id: Uuid,
    ) -> PortResult<ClientReminderSettings> {
        let mut settings = self.settings.write().await;
        let entry = settings
            .entry(client_id)
            .or_insert_with(|| ClientReminderSettings::with_defaults(client_id, coach_id, Utc::now()));
        Ok(entry.clone())
    }

    async fn save_settings(&self, settings: &ClientReminderSettings) -> PortResult<()> {
        self.settings
            .write()
            .await
            .insert(settings.client_id, settings.clone());
        Ok(())
    }

    async fn update_settings(
        &self,
        client_id: Uuid,
        coach_id: Uuid,
        update: &ReminderSettingsUpdate,
        now: DateTime<Utc>,
    ) -> PortResult<ClientReminderSettings> {
        let mut settings = self.settings.write().await;
        let entry = settings
            .entry(client_id)
            .or_insert_with(|| ClientReminderSettings::with_defaults(client_id, coach_id, now));
        entry
            .apply_update(update, now)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(entry.clone())
    }

    async fn record_triggers(&self, client_id: Uuid, triggers: &[Trigger]) -> PortResult<()> {
        let current: HashSet<Uuid> = triggers.iter().map(|t| t.id).collect();
        let mut stored = self.triggers.write().await;

        for existing in stored.values_mut() {
            if existing.trigger.client_id == client_id && !current.contains(&existing.trigger.id) {
                existing.open = false;
            }
        }
        for trigger in triggers {
            stored
                .entry(trigger.id)
                .and_modify(|s| s.open = true)
                .or_insert_with(|| StoredTrigger {
                    trigger: trigger.clone(),
                    open: true,
                });
        }
        Ok(())
    }

    async fn open_triggers(&self, client_id: Uuid) -> PortResult<Vec<Trigger>> {
        let mut open: Vec<Trigger> = self
            .triggers
            .read()
            .await
            .values()
            .filter(|s| s.open && s.trigger.client_id == client_id)
            .map(|s| s.trigger.clone())
            .collect();
        open.sort_by_key(|t| t.detected_at);
        Ok(open)
    }

    async fn get_trigger(&self, trigger_id: Uuid) -> PortResult<Trigger> {
        self.triggers
            .read()
            .await
            .get(&trigger_id)
            .map(|s| s.trigger.clone())
            .ok_or_else(|| PortError::NotFound(format!("Trigger {} not found", trigger_id)))
    }

    async fn record_dispatch(&self, dispatch: &ReminderDispatch) -> PortResult<()> {
        if self.reject_dispatches.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("dispatch ledger is unavailable".into()));
        }
        self.dispatches.write().await.push(dispatch.clone());
        Ok(())
    }

    async fn dispatches_for_trigger(&self, trigger_id: Uuid) -> PortResult<Vec<ReminderDispatch>> {
        Ok(self
            .dispatches
            .read()
            .await
            .iter()
            .filter(|d| d.trigger_id == trigger_id)
            .cloned()
            .collect())
    }

    async fn count_sent_between(
        &self,
        client_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<u32> {
        let count = self
            .dispatches
            .read()
            .await
            .iter()
            .filter(|d| {
                d.client_id == client_id
                    && d.status == DispatchStatus::Sent
                    && d.sent_at >= start
                    && d.sent_at < end
            })
            .count();
        Ok(count as u32)
    }

    async fn recent_dispatches(
        &self,
        client_id: Uuid,
        limit: u32,
    ) -> PortResult<Vec<ReminderDispatch>> {
        Ok(self
            .dispatches
            .read()
            .await
            .iter()
            .rev()
            .filter(|d| d.client_id == client_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

//=========================================================================================
// Client Directory and Activity Source
//=========================================================================================

#[derive(Default)]
struct ClientRecord {
    entries: Vec<ActivityEntry>,
    goals: Vec<Goal>,
    plans: Vec<WeeklyPlan>,
    unavailable: bool,
}

/// Client roster plus each client's activity data.
#[derive(Default)]
pub struct MemoryClients {
    profiles: RwLock<HashMap<Uuid, ClientProfile>>,
    records: RwLock<HashMap<Uuid, ClientRecord>>,
}

impl MemoryClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_client(&self, profile: ClientProfile) {
        self.records.write().await.entry(profile.id).or_default();
        self.profiles.write().await.insert(profile.id, profile);
    }

    pub async fn log_activity(&self, client_id: Uuid, entry: ActivityEntry) {
        self.records
            .write()
            .await
            .entry(client_id)
            .or_default()
            .entries
            .push(entry);
    }

    pub async fn add_goal(&self, client_id: Uuid, goal: Goal) {
        self.records
            .write()
            .await
            .entry(client_id)
            .or_default()
            .goals
            .push(goal);
    }

    pub async fn add_plan(&self, client_id: Uuid, plan: WeeklyPlan) {
        self.records
            .write()
            .await
            .entry(client_id)
            .or_default()
            .plans
            .push(plan);
    }

    /// Makes `load_activity` fail for this client until switched back.
    pub async fn set_unavailable(&self, client_id: Uuid, unavailable: bool) {
        self.records
            .write()
            .await
            .entry(client_id)
            .or_default()
            .unavailable = unavailable;
    }
}

#[async_trait]
impl ClientDirectory for MemoryClients {
    async fn get_client(&self, client_id: Uuid) -> PortResult<ClientProfile> {
        self.profiles
            .read()
            .await
            .get(&client_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Client {} not found", client_id)))
    }

    async fn list_active_clients(&self) -> PortResult<Vec<ClientProfile>> {
        Ok(self.profiles.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl ActivitySource for MemoryClients {
    async fn load_activity(
        &self,
        client_id: Uuid,
        since: DateTime<Utc>,
    ) -> PortResult<ActivitySnapshot> {
        let records = self.records.read().await;
        let Some(record) = records.get(&client_id) else {
            return Ok(ActivitySnapshot::default());
        };
        if record.unavailable {
            return Err(PortError::Unavailable(format!(
                "activity for client {} is unavailable",
                client_id
            )));
        }
        Ok(ActivitySnapshot {
            entries: record
                .entries
                .iter()
                .filter(|e| e.occurred_at >= since)
                .cloned()
                .collect(),
            last_qualifying_at: record
                .entries
                .iter()
                .filter(|e| e.kind.is_qualifying())
                .map(|e| e.occurred_at)
                .max(),
            goals: record.goals.clone(),
            plans: record.plans.clone(),
        })
    }
}

//=========================================================================================
// Recording Sender
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub client_id: Uuid,
    pub channel: Channel,
    pub message: String,
}

/// Records every delivered message; channels can be switched to failing.
#[derive(Default)]
pub struct RecordingSender {
    sent: RwLock<Vec<SentMessage>>,
    failing: RwLock<HashSet<Channel>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_failing(&self, channel: Channel, failing: bool) {
        let mut set = self.failing.write().await;
        if failing {
            set.insert(channel);
        } else {
            set.remove(&channel);
        }
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, client_id: Uuid, channel: Channel, message: &str) -> DeliveryResult {
        if self.failing.read().await.contains(&channel) {
            return DeliveryResult::failed(format!("{} channel is down", channel.as_str()));
        }
        self.sent.write().await.push(SentMessage {
            client_id,
            channel,
            message: message.to_string(),
        });
        DeliveryResult::delivered()
    }
}
