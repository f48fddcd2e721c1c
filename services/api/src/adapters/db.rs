//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the `ReminderStore`, `ClientDirectory` and `ActivitySource` ports from the
//! core crate. It handles all interactions with PostgreSQL using `sqlx`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use engagement_core::domain::{
    ActivityEntry, ActivityKind, ActivitySnapshot, Channel, ClientProfile,
    ClientReminderSettings, DispatchStatus, Goal, PlanTask, ReminderDispatch,
    ReminderSettingsUpdate, Severity, SuppressionReason, Trigger, TriggerCategory, WeeklyPlan,
};
use engagement_core::ports::{
    ActivitySource, ClientDirectory, PortError, PortResult, ReminderStore,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const SETTINGS_COLUMNS: &str = "id, client_id, coach_id, reminders_enabled, \
    goal_reminders_enabled, plan_reminders_enabled, inactivity_reminders_enabled, \
    inactivity_threshold_days, quiet_hours_start, quiet_hours_end, max_reminders_per_day, \
    created_at, updated_at";

const TRIGGER_COLUMNS: &str = "id, client_id, category, severity, description, detected_at";

const DISPATCH_COLUMNS: &str =
    "id, client_id, trigger_id, channel, composed_message, sent_at, status, reason, error";

const CLIENT_COLUMNS: &str = "id, coach_id, display_name, utc_offset_minutes, created_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage and read-side ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what()),
        other => unexpected(other),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SettingsRecord {
    id: Uuid,
    client_id: Uuid,
    coach_id: Uuid,
    reminders_enabled: bool,
    goal_reminders_enabled: bool,
    plan_reminders_enabled: bool,
    inactivity_reminders_enabled: bool,
    inactivity_threshold_days: i32,
    quiet_hours_start: NaiveTime,
    quiet_hours_end: NaiveTime,
    max_reminders_per_day: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl SettingsRecord {
    fn to_domain(self) -> PortResult<ClientReminderSettings> {
        let as_u32 = |value: i32, column: &str| {
            u32::try_from(value).map_err(|_| {
                PortError::Unexpected(format!("invalid {} for client {}", column, self.client_id))
            })
        };
        Ok(ClientReminderSettings {
            id: self.id,
            client_id: self.client_id,
            coach_id: self.coach_id,
            reminders_enabled: self.reminders_enabled,
            goal_reminders_enabled: self.goal_reminders_enabled,
            plan_reminders_enabled: self.plan_reminders_enabled,
            inactivity_reminders_enabled: self.inactivity_reminders_enabled,
            inactivity_threshold_days: as_u32(
                self.inactivity_threshold_days,
                "inactivity_threshold_days",
            )?,
            quiet_hours_start: self.quiet_hours_start,
            quiet_hours_end: self.quiet_hours_end,
            max_reminders_per_day: as_u32(self.max_reminders_per_day, "max_reminders_per_day")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TriggerRecord {
    id: Uuid,
    client_id: Uuid,
    category: String,
    severity: String,
    description: String,
    detected_at: DateTime<Utc>,
}
impl TriggerRecord {
    fn to_domain(self) -> PortResult<Trigger> {
        let category = TriggerCategory::parse(&self.category).ok_or_else(|| {
            PortError::Unexpected(format!("unknown trigger category '{}'", self.category))
        })?;
        let severity = Severity::parse(&self.severity).ok_or_else(|| {
            PortError::Unexpected(format!("unknown trigger severity '{}'", self.severity))
        })?;
        Ok(Trigger {
            id: self.id,
            client_id: self.client_id,
            category,
            severity,
            description: self.description,
            detected_at: self.detected_at,
        })
    }
}

#[derive(FromRow)]
struct DispatchRecord {
    id: Uuid,
    client_id: Uuid,
    trigger_id: Uuid,
    channel: Option<String>,
    composed_message: String,
    sent_at: DateTime<Utc>,
    status: String,
    reason: Option<String>,
    error: Option<String>,
}
impl DispatchRecord {
    fn to_domain(self) -> PortResult<ReminderDispatch> {
        let status = match (self.status.as_str(), self.reason.as_deref()) {
            ("sent", _) => DispatchStatus::Sent,
            ("suppressed", Some(reason)) => DispatchStatus::Suppressed(
                SuppressionReason::parse(reason).ok_or_else(|| {
                    PortError::Unexpected(format!("unknown suppression reason '{}'", reason))
                })?,
            ),
            ("failed", _) => DispatchStatus::Failed(self.error.unwrap_or_default()),
            (status, _) => {
                return Err(PortError::Unexpected(format!(
                    "invalid dispatch status '{}' on {}",
                    status, self.id
                )))
            }
        };
        Ok(ReminderDispatch {
            id: self.id,
            client_id: self.client_id,
            trigger_id: self.trigger_id,
            channel: self.channel.as_deref().and_then(Channel::parse),
            composed_message: self.composed_message,
            sent_at: self.sent_at,
            status,
        })
    }
}

#[derive(FromRow)]
struct ClientRecord {
    id: Uuid,
    coach_id: Uuid,
    display_name: Option<String>,
    utc_offset_minutes: i32,
    created_at: DateTime<Utc>,
}
impl ClientRecord {
    fn to_domain(self) -> ClientProfile {
        ClientProfile {
            id: self.id,
            coach_id: self.coach_id,
            display_name: self.display_name,
            utc_offset_minutes: self.utc_offset_minutes,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ActivityRecord {
    kind: String,
    occurred_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct GoalRecord {
    id: Uuid,
    title: String,
    active: bool,
    created_at: DateTime<Utc>,
    last_progress_at: Option<DateTime<Utc>>,
}
impl GoalRecord {
    fn to_domain(self) -> Goal {
        Goal {
            id: self.id,
            title: self.title,
            active: self.active,
            created_at: self.created_at,
            last_progress_at: self.last_progress_at,
        }
    }
}

#[derive(FromRow)]
struct PlanRecord {
    id: Uuid,
    title: String,
    assigned: bool,
}

#[derive(FromRow)]
struct PlanTaskRecord {
    id: Uuid,
    plan_id: Uuid,
    title: String,
    due_on: NaiveDate,
    completed: bool,
}

//=========================================================================================
// `ReminderStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ReminderStore for DbAdapter {
    async fn get_settings(&self, client_id: Uuid) -> PortResult<Option<ClientReminderSettings>> {
        let query = format!(
            "SELECT {SETTINGS_COLUMNS} FROM client_reminder_settings WHERE client_id = $1"
        );
        sqlx::query_as::<_, SettingsRecord>(&query)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .map(SettingsRecord::to_domain)
            .transpose()
    }

    async fn get_or_create_settings(
        &self,
        client_id: Uuid,
        coach_id: Uuid,
    ) -> PortResult<ClientReminderSettings> {
        let defaults = ClientReminderSettings::with_defaults(client_id, coach_id, Utc::now());
        let insert = format!(
            "INSERT INTO client_reminder_settings ({SETTINGS_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (client_id) DO NOTHING"
        );
        bind_settings(sqlx::query(&insert), &defaults)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        self.get_settings(client_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Settings for client {} not found", client_id)))
    }

    async fn save_settings(&self, settings: &ClientReminderSettings) -> PortResult<()> {
        let query = format!(
            "INSERT INTO client_reminder_settings ({SETTINGS_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (client_id) DO UPDATE SET \
                reminders_enabled = EXCLUDED.reminders_enabled, \
                goal_reminders_enabled = EXCLUDED.goal_reminders_enabled, \
                plan_reminders_enabled = EXCLUDED.plan_reminders_enabled, \
                inactivity_reminders_enabled = EXCLUDED.inactivity_reminders_enabled, \
                inactivity_threshold_days = EXCLUDED.inactivity_threshold_days, \
                quiet_hours_start = EXCLUDED.quiet_hours_start, \
                quiet_hours_end = EXCLUDED.quiet_hours_end, \
                max_reminders_per_day = EXCLUDED.max_reminders_per_day, \
                updated_at = EXCLUDED.updated_at"
        );
        bind_settings(sqlx::query(&query), settings)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn update_settings(
        &self,
        client_id: Uuid,
        coach_id: Uuid,
        update: &ReminderSettingsUpdate,
        now: DateTime<Utc>,
    ) -> PortResult<ClientReminderSettings> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let defaults = ClientReminderSettings::with_defaults(client_id, coach_id, now);
        let insert = format!(
            "INSERT INTO client_reminder_settings ({SETTINGS_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (client_id) DO NOTHING"
        );
        bind_settings(sqlx::query(&insert), &defaults)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        // Row lock held until commit; concurrent updates for the client queue here.
        let select = format!(
            "SELECT {SETTINGS_COLUMNS} FROM client_reminder_settings \
             WHERE client_id = $1 FOR UPDATE"
        );
        let mut settings = sqlx::query_as::<_, SettingsRecord>(&select)
            .bind(client_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(unexpected)?
            .to_domain()?;
        settings
            .apply_update(update, now)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        sqlx::query(
            "UPDATE client_reminder_settings SET \
                reminders_enabled = $2, \
                goal_reminders_enabled = $3, \
                plan_reminders_enabled = $4, \
                inactivity_reminders_enabled = $5, \
                inactivity_threshold_days = $6, \
                quiet_hours_start = $7, \
                quiet_hours_end = $8, \
                max_reminders_per_day = $9, \
                updated_at = $10 \
             WHERE client_id = $1",
        )
        .bind(client_id)
        .bind(settings.reminders_enabled)
        .bind(settings.goal_reminders_enabled)
        .bind(settings.plan_reminders_enabled)
        .bind(settings.inactivity_reminders_enabled)
        .bind(settings.inactivity_threshold_days as i32)
        .bind(settings.quiet_hours_start)
        .bind(settings.quiet_hours_end)
        .bind(settings.max_reminders_per_day as i32)
        .bind(settings.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(settings)
    }

    async fn record_triggers(&self, client_id: Uuid, triggers: &[Trigger]) -> PortResult<()> {
        let ids: Vec<Uuid> = triggers.iter().map(|t| t.id).collect();
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "UPDATE reminder_triggers SET superseded_at = NOW() \
             WHERE client_id = $1 AND superseded_at IS NULL AND NOT (id = ANY($2))",
        )
        .bind(client_id)
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        let insert = format!(
            "INSERT INTO reminder_triggers ({TRIGGER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET superseded_at = NULL"
        );
        for trigger in triggers {
            sqlx::query(&insert)
                .bind(trigger.id)
                .bind(trigger.client_id)
                .bind(trigger.category.as_str())
                .bind(trigger.severity.as_str())
                .bind(&trigger.description)
                .bind(trigger.detected_at)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)
    }

    async fn open_triggers(&self, client_id: Uuid) -> PortResult<Vec<Trigger>> {
        let query = format!(
            "SELECT {TRIGGER_COLUMNS} FROM reminder_triggers \
             WHERE client_id = $1 AND superseded_at IS NULL \
             ORDER BY detected_at ASC"
        );
        sqlx::query_as::<_, TriggerRecord>(&query)
            .bind(client_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?
            .into_iter()
            .map(TriggerRecord::to_domain)
            .collect()
    }

    async fn get_trigger(&self, trigger_id: Uuid) -> PortResult<Trigger> {
        let query = format!("SELECT {TRIGGER_COLUMNS} FROM reminder_triggers WHERE id = $1");
        sqlx::query_as::<_, TriggerRecord>(&query)
            .bind(trigger_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or_unexpected(e, || format!("Trigger {} not found", trigger_id)))?
            .to_domain()
    }

    async fn record_dispatch(&self, dispatch: &ReminderDispatch) -> PortResult<()> {
        let (reason, error) = match &dispatch.status {
            DispatchStatus::Sent => (None, None),
            DispatchStatus::Suppressed(reason) => (Some(reason.as_str()), None),
            DispatchStatus::Failed(error) => (None, Some(error.as_str())),
        };
        let query = format!(
            "INSERT INTO reminder_dispatches ({DISPATCH_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&query)
            .bind(dispatch.id)
            .bind(dispatch.client_id)
            .bind(dispatch.trigger_id)
            .bind(dispatch.channel.map(Channel::as_str))
            .bind(&dispatch.composed_message)
            .bind(dispatch.sent_at)
            .bind(dispatch.status.as_str())
            .bind(reason)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn dispatches_for_trigger(&self, trigger_id: Uuid) -> PortResult<Vec<ReminderDispatch>> {
        let query = format!(
            "SELECT {DISPATCH_COLUMNS} FROM reminder_dispatches \
             WHERE trigger_id = $1 ORDER BY sent_at ASC"
        );
        sqlx::query_as::<_, DispatchRecord>(&query)
            .bind(trigger_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?
            .into_iter()
            .map(DispatchRecord::to_domain)
            .collect()
    }

    async fn count_sent_between(
        &self,
        client_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reminder_dispatches \
             WHERE client_id = $1 AND status = 'sent' AND sent_at >= $2 AND sent_at < $3",
        )
        .bind(client_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn recent_dispatches(
        &self,
        client_id: Uuid,
        limit: u32,
    ) -> PortResult<Vec<ReminderDispatch>> {
        let query = format!(
            "SELECT {DISPATCH_COLUMNS} FROM reminder_dispatches \
             WHERE client_id = $1 ORDER BY sent_at DESC, id DESC LIMIT $2"
        );
        sqlx::query_as::<_, DispatchRecord>(&query)
            .bind(client_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?
            .into_iter()
            .map(DispatchRecord::to_domain)
            .collect()
    }
}

fn bind_settings<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    settings: &ClientReminderSettings,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(settings.id)
        .bind(settings.client_id)
        .bind(settings.coach_id)
        .bind(settings.reminders_enabled)
        .bind(settings.goal_reminders_enabled)
        .bind(settings.plan_reminders_enabled)
        .bind(settings.inactivity_reminders_enabled)
        .bind(settings.inactivity_threshold_days as i32)
        .bind(settings.quiet_hours_start)
        .bind(settings.quiet_hours_end)
        .bind(settings.max_reminders_per_day as i32)
        .bind(settings.created_at)
        .bind(settings.updated_at)
}

//=========================================================================================
// `ClientDirectory` and `ActivitySource` Trait Implementations
//=========================================================================================

#[async_trait]
impl ClientDirectory for DbAdapter {
    async fn get_client(&self, client_id: Uuid) -> PortResult<ClientProfile> {
        let query = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1 AND active");
        let record = sqlx::query_as::<_, ClientRecord>(&query)
            .bind(client_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or_unexpected(e, || format!("Client {} not found", client_id)))?;
        Ok(record.to_domain())
    }

    async fn list_active_clients(&self) -> PortResult<Vec<ClientProfile>> {
        let query = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE active ORDER BY id");
        let records = sqlx::query_as::<_, ClientRecord>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(ClientRecord::to_domain).collect())
    }
}

#[async_trait]
impl ActivitySource for DbAdapter {
    async fn load_activity(
        &self,
        client_id: Uuid,
        since: DateTime<Utc>,
    ) -> PortResult<ActivitySnapshot> {
        let unavailable = |e: sqlx::Error| PortError::Unavailable(e.to_string());

        let entries = sqlx::query_as::<_, ActivityRecord>(
            "SELECT kind, occurred_at FROM activity_logs \
             WHERE client_id = $1 AND occurred_at >= $2",
        )
        .bind(client_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?
        .into_iter()
        .filter_map(|r| {
            ActivityKind::parse(&r.kind).map(|kind| ActivityEntry {
                kind,
                occurred_at: r.occurred_at,
            })
        })
        .collect();

        let last_qualifying_at = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(occurred_at) FROM activity_logs \
             WHERE client_id = $1 AND kind <> $2",
        )
        .bind(client_id)
        .bind(ActivityKind::Login.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        let goals = sqlx::query_as::<_, GoalRecord>(
            "SELECT id, title, active, created_at, last_progress_at FROM goals \
             WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?
        .into_iter()
        .map(GoalRecord::to_domain)
        .collect();

        let plans = sqlx::query_as::<_, PlanRecord>(
            "SELECT id, title, assigned FROM weekly_plans WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let tasks = sqlx::query_as::<_, PlanTaskRecord>(
            "SELECT t.id, t.plan_id, t.title, t.due_on, t.completed FROM plan_tasks t \
             JOIN weekly_plans p ON p.id = t.plan_id \
             WHERE p.client_id = $1",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut tasks_by_plan: HashMap<Uuid, Vec<PlanTask>> = HashMap::new();
        for t in tasks {
            tasks_by_plan.entry(t.plan_id).or_default().push(PlanTask {
                id: t.id,
                title: t.title,
                due_on: t.due_on,
                completed: t.completed,
            });
        }
        let plans = plans
            .into_iter()
            .map(|p| WeeklyPlan {
                tasks: tasks_by_plan.remove(&p.id).unwrap_or_default(),
                id: p.id,
                title: p.title,
                assigned: p.assigned,
            })
            .collect();

        Ok(ActivitySnapshot {
            entries,
            last_qualifying_at,
            goals,
            plans,
        })
    }
}
