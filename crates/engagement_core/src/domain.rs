//! crates/engagement_core/src/domain.rs
//!
//! Defines the pure, core data structures for the engagement engine.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use uuid::Uuid;

//=========================================================================================
// Reminder Settings
//=========================================================================================

pub const DEFAULT_INACTIVITY_THRESHOLD_DAYS: u32 = 2;
pub const DEFAULT_MAX_REMINDERS_PER_DAY: u32 = 3;
pub const INACTIVITY_THRESHOLD_RANGE: std::ops::RangeInclusive<u32> = 1..=7;
pub const MAX_REMINDERS_PER_DAY_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Per-client reminder configuration. One row per client, created with
/// defaults and only ever merged into afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReminderSettings {
    pub id: Uuid,
    pub client_id: Uuid,
    pub coach_id: Uuid,
    pub reminders_enabled: bool,
    pub goal_reminders_enabled: bool,
    pub plan_reminders_enabled: bool,
    pub inactivity_reminders_enabled: bool,
    pub inactivity_threshold_days: u32,
    pub quiet_hours_start: NaiveTime,
    pub quiet_hours_end: NaiveTime,
    pub max_reminders_per_day: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientReminderSettings {
    /// Builds the settings a client gets on creation.
    pub fn with_defaults(client_id: Uuid, coach_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            coach_id,
            reminders_enabled: true,
            goal_reminders_enabled: true,
            plan_reminders_enabled: true,
            inactivity_reminders_enabled: true,
            inactivity_threshold_days: DEFAULT_INACTIVITY_THRESHOLD_DAYS,
            quiet_hours_start: hm(21, 0),
            quiet_hours_end: hm(8, 0),
            max_reminders_per_day: DEFAULT_MAX_REMINDERS_PER_DAY,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the per-category toggle allows this category. Does not look at
    /// the master switch.
    pub fn category_enabled(&self, category: TriggerCategory) -> bool {
        match category {
            TriggerCategory::Goal => self.goal_reminders_enabled,
            TriggerCategory::Plan => self.plan_reminders_enabled,
            TriggerCategory::Inactivity => self.inactivity_reminders_enabled,
        }
    }

    /// Merges a partial update. Fields absent from `update` keep their
    /// current value. The update is validated as a whole before anything is
    /// written, so a rejected update leaves `self` untouched.
    pub fn apply_update(
        &mut self,
        update: &ReminderSettingsUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), SettingsError> {
        update.validate()?;

        if let Some(v) = update.reminders_enabled {
            self.reminders_enabled = v;
        }
        if let Some(v) = update.goal_reminders_enabled {
            self.goal_reminders_enabled = v;
        }
        if let Some(v) = update.plan_reminders_enabled {
            self.plan_reminders_enabled = v;
        }
        if let Some(v) = update.inactivity_reminders_enabled {
            self.inactivity_reminders_enabled = v;
        }
        if let Some(v) = update.inactivity_threshold_days {
            self.inactivity_threshold_days = v;
        }
        if let Some(v) = update.quiet_hours_start {
            self.quiet_hours_start = v;
        }
        if let Some(v) = update.quiet_hours_end {
            self.quiet_hours_end = v;
        }
        if let Some(v) = update.max_reminders_per_day {
            self.max_reminders_per_day = v;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// A partial settings update. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderSettingsUpdate {
    pub reminders_enabled: Option<bool>,
    pub goal_reminders_enabled: Option<bool>,
    pub plan_reminders_enabled: Option<bool>,
    pub inactivity_reminders_enabled: Option<bool>,
    pub inactivity_threshold_days: Option<u32>,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub max_reminders_per_day: Option<u32>,
}

impl ReminderSettingsUpdate {
    /// Range checks for the numeric fields that are present.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(days) = self.inactivity_threshold_days {
            if !INACTIVITY_THRESHOLD_RANGE.contains(&days) {
                return Err(SettingsError::InactivityThresholdOutOfRange(days));
            }
        }
        if let Some(max) = self.max_reminders_per_day {
            if !MAX_REMINDERS_PER_DAY_RANGE.contains(&max) {
                return Err(SettingsError::MaxRemindersOutOfRange(max));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("inactivityThresholdDays must be between 1 and 7, got {0}")]
    InactivityThresholdOutOfRange(u32),
    #[error("maxRemindersPerDay must be between 1 and 10, got {0}")]
    MaxRemindersOutOfRange(u32),
    #[error("invalid time of day '{0}', expected HH:MM")]
    InvalidTimeOfDay(String),
}

/// Parses a client-local `HH:MM` time of day.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, SettingsError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| SettingsError::InvalidTimeOfDay(raw.to_string()))
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

//=========================================================================================
// Clients and Activity
//=========================================================================================

/// The slice of a client profile the engine needs.
#[derive(Debug, Clone)]
pub struct ClientProfile {
    pub id: Uuid,
    pub coach_id: Uuid,
    pub display_name: Option<String>,
    /// Client-local offset from UTC, in minutes.
    pub utc_offset_minutes: i32,
    pub created_at: DateTime<Utc>,
}

impl ClientProfile {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset())
    }

    /// The UTC instants bounding the client-local calendar day containing `now`.
    pub fn local_day_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let local = self.local_time(now);
        let midnight = local.date_naive().and_time(NaiveTime::MIN);
        let start = (midnight - Duration::seconds(i64::from(self.offset().local_minus_utc())))
            .and_utc();
        (start, start + Duration::days(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    DataLog,
    Session,
    TaskCompletion,
    Login,
}

impl ActivityKind {
    /// Logins alone do not count as engagement.
    pub fn is_qualifying(self) -> bool {
        !matches!(self, ActivityKind::Login)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::DataLog => "data_log",
            ActivityKind::Session => "session",
            ActivityKind::TaskCompletion => "task_completion",
            ActivityKind::Login => "login",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "data_log" => Some(ActivityKind::DataLog),
            "session" => Some(ActivityKind::Session),
            "task_completion" => Some(ActivityKind::TaskCompletion),
            "login" => Some(ActivityKind::Login),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Goal {
    pub id: Uuid,
    pub title: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_progress_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PlanTask {
    pub id: Uuid,
    pub title: String,
    pub due_on: NaiveDate,
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct WeeklyPlan {
    pub id: Uuid,
    pub title: String,
    pub assigned: bool,
    pub tasks: Vec<PlanTask>,
}

/// Everything the detector reads for one client in one pass.
#[derive(Debug, Clone, Default)]
pub struct ActivitySnapshot {
    /// Entries inside the loaded window.
    pub entries: Vec<ActivityEntry>,
    /// Latest qualifying activity ever, even when it is older than the window.
    pub last_qualifying_at: Option<DateTime<Utc>>,
    pub goals: Vec<Goal>,
    pub plans: Vec<WeeklyPlan>,
}

//=========================================================================================
// Triggers
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerCategory {
    Goal,
    Plan,
    Inactivity,
}

impl TriggerCategory {
    pub const ALL: [TriggerCategory; 3] = [
        TriggerCategory::Goal,
        TriggerCategory::Plan,
        TriggerCategory::Inactivity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerCategory::Goal => "goal",
            TriggerCategory::Plan => "plan",
            TriggerCategory::Inactivity => "inactivity",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

/// Ordered so that `High` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Low" => Some(Severity::Low),
            "Medium" => Some(Severity::Medium),
            "High" => Some(Severity::High),
            _ => None,
        }
    }
}

/// A detected condition. Immutable; a later detection pass supersedes it
/// rather than editing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub id: Uuid,
    pub client_id: Uuid,
    pub category: TriggerCategory,
    pub severity: Severity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

//=========================================================================================
// Dispatch Ledger
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Sms,
    Push,
    InApp,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Push => "push",
            Channel::InApp => "in_app",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sms" => Some(Channel::Sms),
            "push" => Some(Channel::Push),
            "in_app" => Some(Channel::InApp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppressionReason {
    NoSettings,
    PolicyDisabled,
    QuietHours,
    DailyCap,
}

impl SuppressionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SuppressionReason::NoSettings => "no_settings",
            SuppressionReason::PolicyDisabled => "policy_disabled",
            SuppressionReason::QuietHours => "quiet_hours",
            SuppressionReason::DailyCap => "daily_cap",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "no_settings" => Some(SuppressionReason::NoSettings),
            "policy_disabled" => Some(SuppressionReason::PolicyDisabled),
            "quiet_hours" => Some(SuppressionReason::QuietHours),
            "daily_cap" => Some(SuppressionReason::DailyCap),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    Sent,
    Suppressed(SuppressionReason),
    Failed(String),
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Sent => "sent",
            DispatchStatus::Suppressed(_) => "suppressed",
            DispatchStatus::Failed(_) => "failed",
        }
    }
}

/// One evaluated outcome for one trigger. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderDispatch {
    pub id: Uuid,
    pub client_id: Uuid,
    pub trigger_id: Uuid,
    /// `None` when nothing was handed to a sender.
    pub channel: Option<Channel>,
    pub composed_message: String,
    pub sent_at: DateTime<Utc>,
    pub status: DispatchStatus,
}

/// What a `NotificationSender` reports back for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub delivered: bool,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn delivered() -> Self {
        Self {
            delivered: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            delivered: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> ClientReminderSettings {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        ClientReminderSettings::with_defaults(Uuid::new_v4(), Uuid::new_v4(), now)
    }

    #[test]
    fn defaults_are_explicit() {
        let s = settings();
        assert!(s.reminders_enabled);
        assert_eq!(s.inactivity_threshold_days, 2);
        assert_eq!(s.max_reminders_per_day, 3);
        assert_eq!(s.quiet_hours_start, hm(21, 0));
        assert_eq!(s.quiet_hours_end, hm(8, 0));
    }

    #[test]
    fn partial_update_keeps_unspecified_fields() {
        let mut s = settings();
        s.goal_reminders_enabled = false;
        s.max_reminders_per_day = 5;
        let before = s.clone();

        let later = s.updated_at + Duration::hours(1);
        let update = ReminderSettingsUpdate {
            inactivity_threshold_days: Some(4),
            ..Default::default()
        };
        s.apply_update(&update, later).unwrap();

        assert_eq!(s.inactivity_threshold_days, 4);
        assert!(!s.goal_reminders_enabled);
        assert_eq!(s.max_reminders_per_day, 5);
        assert_eq!(s.quiet_hours_start, before.quiet_hours_start);
        assert_eq!(s.created_at, before.created_at);
        assert_eq!(s.updated_at, later);
    }

    #[test]
    fn out_of_range_update_is_rejected_without_partial_writes() {
        let mut s = settings();
        let before = s.clone();
        let update = ReminderSettingsUpdate {
            reminders_enabled: Some(false),
            max_reminders_per_day: Some(11),
            ..Default::default()
        };
        assert_eq!(
            s.apply_update(&update, Utc::now()),
            Err(SettingsError::MaxRemindersOutOfRange(11))
        );
        assert_eq!(s, before);

        let update = ReminderSettingsUpdate {
            inactivity_threshold_days: Some(0),
            ..Default::default()
        };
        assert!(s.apply_update(&update, Utc::now()).is_err());
    }

    #[test]
    fn parses_hh_mm() {
        assert_eq!(parse_time_of_day("07:30").unwrap(), hm(7, 30));
        assert!(parse_time_of_day("7pm").is_err());
        assert!(parse_time_of_day("25:00").is_err());
    }

    #[test]
    fn local_day_bounds_follow_the_client_offset() {
        let profile = ClientProfile {
            id: Uuid::new_v4(),
            coach_id: Uuid::new_v4(),
            display_name: None,
            utc_offset_minutes: -300,
            created_at: Utc::now(),
        };
        // 02:00 UTC on the 3rd is 21:00 on the 2nd at UTC-5.
        let now = Utc.with_ymd_and_hms(2026, 3, 3, 2, 0, 0).unwrap();
        let (start, end) = profile.local_day_bounds(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 3, 5, 0, 0).unwrap());
    }
}
