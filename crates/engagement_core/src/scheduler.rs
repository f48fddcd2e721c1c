//! crates/engagement_core/src/scheduler.rs
//!
//! The reminder scheduler: runs detection for a client, walks the triggers in
//! priority order, applies policy and the daily cap, hands eligible messages to
//! the notification sender and writes one ledger row per evaluated trigger.
//!
//! Each client's evaluation runs under that client's lock. Scheduled passes
//! skip a client whose lock is held; manual requests queue behind it for a
//! bounded time and report `Busy` if it does not free up.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::composer::{ComposedMessage, MessageComposer};
use crate::detector::TriggerDetector;
use crate::domain::{
    Channel, ClientProfile, ClientReminderSettings, DispatchStatus, ReminderDispatch,
    SuppressionReason, Trigger, TriggerCategory, DEFAULT_INACTIVITY_THRESHOLD_DAYS,
};
use crate::locks::{ClientGuard, ClientLocks};
use crate::policy::{self, Eligibility};
use crate::ports::{
    ActivitySource, ClientDirectory, NotificationSender, PortError, ReminderStore,
};

//=========================================================================================
// Configuration, Errors and Results
//=========================================================================================

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delivery channels in order of preference; later ones are fallbacks.
    pub channels: Vec<Channel>,
    /// How long after a failed delivery the trigger becomes eligible again.
    pub retry_failed_after: Duration,
    /// Upper bound on how long a manual request waits for a running pass.
    pub manual_timeout: StdDuration,
    /// How far back activity is loaded for detection.
    pub activity_window_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            channels: vec![Channel::InApp],
            retry_failed_after: Duration::minutes(15),
            manual_timeout: StdDuration::from_secs(30),
            activity_window_days: 30,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("A reminder pass is already running for client {0}")]
    Busy(Uuid),
    #[error("Client {0} not found")]
    ClientNotFound(Uuid),
    #[error("Trigger {0} is not an open trigger for this client")]
    TriggerNotOpen(Uuid),
    #[error("Trigger {0} has already been dispatched")]
    AlreadyDispatched(Uuid),
    #[error("Reminder message must not be empty")]
    EmptyMessage,
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Non-fatal conditions surfaced to the coach alongside a pass result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassWarning {
    /// The client has no reminder settings; every trigger was suppressed.
    MissingSettings,
    /// Settings exist but could not be loaded.
    InvalidSettings(String),
    /// Activity data could not be read; detection was skipped.
    DetectorDataUnavailable(String),
    /// A dispatch row could not be written. The pass stopped after that
    /// trigger so no further message goes out unrecorded.
    LedgerWriteFailed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOptions {
    pub bypass_quiet_hours: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub client_id: Uuid,
    pub sent_count: u32,
    pub suppressed_count: u32,
    pub failed_count: u32,
    /// Triggers skipped because they were already sent, or because the
    /// suppression or failure recorded for them still applies.
    pub skipped_count: u32,
    pub warnings: Vec<PassWarning>,
    pub dispatches: Vec<ReminderDispatch>,
}

impl PassSummary {
    fn new(client_id: Uuid) -> Self {
        Self {
            client_id,
            ..Default::default()
        }
    }

    fn push(&mut self, dispatch: ReminderDispatch) {
        match dispatch.status {
            DispatchStatus::Sent => self.sent_count += 1,
            DispatchStatus::Suppressed(_) => self.suppressed_count += 1,
            DispatchStatus::Failed(_) => self.failed_count += 1,
        }
        self.dispatches.push(dispatch);
    }
}

/// An open trigger with the message that would be sent for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPreview {
    pub trigger: Trigger,
    pub message: ComposedMessage,
}

/// Sorts into dispatch order: High before Medium before Low, earlier
/// detection first within a severity.
pub fn dispatch_order(triggers: &mut [Trigger]) {
    triggers.sort_by_key(|t| (Reverse(t.severity), t.detected_at));
}

//=========================================================================================
// Scheduler
//=========================================================================================

/// Per-evaluation state shared across the triggers of one client.
struct EvaluationContext {
    profile: ClientProfile,
    settings: Option<ClientReminderSettings>,
    local_time: NaiveTime,
    sent_today: u32,
    bypass_quiet_hours: bool,
}

impl EvaluationContext {
    /// The suppression a trigger of this category would get right now, if any.
    /// Checked in order: settings, policy, daily cap.
    fn blocking_reason(&self, category: TriggerCategory) -> Option<SuppressionReason> {
        let Some(settings) = self.settings.as_ref() else {
            return Some(SuppressionReason::NoSettings);
        };
        if let Eligibility::Ineligible(reason) =
            policy::evaluate(settings, category, self.local_time, self.bypass_quiet_hours)
        {
            return Some(reason);
        }
        if self.sent_today >= settings.max_reminders_per_day {
            return Some(SuppressionReason::DailyCap);
        }
        None
    }
}

/// Whether a trigger should be evaluated in this pass, judged from its
/// dispatch history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Ready,
    AlreadySent,
    /// The last outcome was a suppression or failure that still applies.
    Waiting,
}

pub struct ReminderScheduler {
    store: Arc<dyn ReminderStore>,
    directory: Arc<dyn ClientDirectory>,
    activity: Arc<dyn ActivitySource>,
    sender: Arc<dyn NotificationSender>,
    detector: TriggerDetector,
    composer: MessageComposer,
    config: SchedulerConfig,
    locks: ClientLocks,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        directory: Arc<dyn ClientDirectory>,
        activity: Arc<dyn ActivitySource>,
        sender: Arc<dyn NotificationSender>,
        detector: TriggerDetector,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            directory,
            activity,
            sender,
            detector,
            composer: MessageComposer::default(),
            config,
            locks: ClientLocks::new(),
        }
    }

    pub fn with_composer(mut self, composer: MessageComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn composer(&self) -> &MessageComposer {
        &self.composer
    }

    /// One periodic pass. Returns `Busy` without waiting if the client is
    /// already being evaluated.
    pub async fn run_scheduled_pass(
        &self,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PassSummary, SchedulerError> {
        let guard = self
            .locks
            .try_acquire(client_id)
            .ok_or(SchedulerError::Busy(client_id))?;
        self.evaluate_client(&guard, client_id, PassOptions::default(), now)
            .await
    }

    /// A coach-initiated pass. Queues behind a running pass for at most the
    /// configured manual timeout. `bypass_quiet_hours` skips only the quiet
    /// hours check; the daily cap always applies.
    pub async fn trigger_now(
        &self,
        client_id: Uuid,
        options: PassOptions,
        now: DateTime<Utc>,
    ) -> Result<PassSummary, SchedulerError> {
        let guard = self
            .locks
            .acquire_within(client_id, self.config.manual_timeout)
            .await
            .ok_or(SchedulerError::Busy(client_id))?;
        self.evaluate_client(&guard, client_id, options, now).await
    }

    /// Runs detection, records the open set and returns it in dispatch order.
    pub async fn detect_triggers(
        &self,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Trigger>, SchedulerError> {
        let profile = self.load_profile(client_id).await?;
        let threshold = match self.store.get_settings(client_id).await {
            Ok(Some(settings)) => settings.inactivity_threshold_days,
            _ => DEFAULT_INACTIVITY_THRESHOLD_DAYS,
        };
        let mut triggers = self.detect(&profile, threshold, now).await?;
        self.store.record_triggers(client_id, &triggers).await?;
        dispatch_order(&mut triggers);
        Ok(triggers)
    }

    /// Composes the message for every open trigger so a coach can review and
    /// edit it before confirming a send.
    pub async fn preview(
        &self,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderPreview>, SchedulerError> {
        let profile = self.load_profile(client_id).await?;
        let triggers = self.detect_triggers(client_id, now).await?;
        Ok(triggers
            .into_iter()
            .map(|trigger| {
                let message = self
                    .composer
                    .compose(&trigger, profile.display_name.as_deref());
                ReminderPreview { trigger, message }
            })
            .collect())
    }

    /// Sends a reviewed (possibly edited) message for one open trigger,
    /// through the same gates as a pass.
    pub async fn send_confirmed(
        &self,
        client_id: Uuid,
        trigger_id: Uuid,
        message: &str,
        options: PassOptions,
        now: DateTime<Utc>,
    ) -> Result<ReminderDispatch, SchedulerError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SchedulerError::EmptyMessage);
        }

        let _guard = self
            .locks
            .acquire_within(client_id, self.config.manual_timeout)
            .await
            .ok_or(SchedulerError::Busy(client_id))?;

        let trigger = match self.store.get_trigger(trigger_id).await {
            Ok(t) if t.client_id == client_id => t,
            Ok(_) | Err(PortError::NotFound(_)) => {
                return Err(SchedulerError::TriggerNotOpen(trigger_id))
            }
            Err(e) => return Err(e.into()),
        };
        let open = self.store.open_triggers(client_id).await?;
        if !open.iter().any(|t| t.id == trigger_id) {
            return Err(SchedulerError::TriggerNotOpen(trigger_id));
        }
        if self
            .store
            .dispatches_for_trigger(trigger_id)
            .await?
            .iter()
            .any(|d| d.status == DispatchStatus::Sent)
        {
            return Err(SchedulerError::AlreadyDispatched(trigger_id));
        }

        let profile = self.load_profile(client_id).await?;
        let (mut ctx, _) = self.context_for(profile, options, now).await?;
        let dispatch = self
            .evaluate_trigger(&mut ctx, &trigger, Some(message), now)
            .await;
        self.persist(&dispatch).await?;
        Ok(dispatch)
    }

    //=====================================================================================
    // Internals
    //=====================================================================================

    async fn evaluate_client(
        &self,
        _guard: &ClientGuard,
        client_id: Uuid,
        options: PassOptions,
        now: DateTime<Utc>,
    ) -> Result<PassSummary, SchedulerError> {
        let profile = self.load_profile(client_id).await?;
        let (mut ctx, warning) = self.context_for(profile, options, now).await?;
        let mut summary = PassSummary::new(client_id);
        summary.warnings.extend(warning);

        let threshold = ctx
            .settings
            .as_ref()
            .map(|s| s.inactivity_threshold_days)
            .unwrap_or(DEFAULT_INACTIVITY_THRESHOLD_DAYS);
        let mut triggers = match self.detect(&ctx.profile, threshold, now).await {
            Ok(triggers) => triggers,
            Err(e) => {
                warn!(%client_id, error = %e, "Activity data unavailable, skipping detection");
                summary
                    .warnings
                    .push(PassWarning::DetectorDataUnavailable(e.to_string()));
                return Ok(summary);
            }
        };
        self.store.record_triggers(client_id, &triggers).await?;
        dispatch_order(&mut triggers);

        for trigger in &triggers {
            match self.readiness(&ctx, trigger, now).await {
                Ok(Readiness::Ready) => {}
                Ok(readiness) => {
                    debug!(%client_id, trigger_id = %trigger.id, ?readiness, "Skipping trigger");
                    summary.skipped_count += 1;
                    continue;
                }
                Err(e) => {
                    error!(%client_id, trigger_id = %trigger.id, error = %e, "Could not read dispatch history, skipping trigger");
                    summary.skipped_count += 1;
                    continue;
                }
            }

            let dispatch = self.evaluate_trigger(&mut ctx, trigger, None, now).await;
            let recorded = self.persist(&dispatch).await;
            summary.push(dispatch);
            if let Err(e) = recorded {
                summary
                    .warnings
                    .push(PassWarning::LedgerWriteFailed(e.to_string()));
                break;
            }
        }

        info!(
            %client_id,
            sent = summary.sent_count,
            suppressed = summary.suppressed_count,
            failed = summary.failed_count,
            skipped = summary.skipped_count,
            "Reminder pass complete"
        );
        Ok(summary)
    }

    async fn load_profile(&self, client_id: Uuid) -> Result<ClientProfile, SchedulerError> {
        self.directory
            .get_client(client_id)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => SchedulerError::ClientNotFound(client_id),
                other => SchedulerError::Port(other),
            })
    }

    async fn context_for(
        &self,
        profile: ClientProfile,
        options: PassOptions,
        now: DateTime<Utc>,
    ) -> Result<(EvaluationContext, Option<PassWarning>), SchedulerError> {
        let (settings, warning) = match self.store.get_settings(profile.id).await {
            Ok(Some(settings)) => (Some(settings), None),
            Ok(None) => {
                warn!(client_id = %profile.id, "No reminder settings, suppressing all triggers");
                (None, Some(PassWarning::MissingSettings))
            }
            Err(e) => {
                warn!(client_id = %profile.id, error = %e, "Reminder settings unreadable, suppressing all triggers");
                (None, Some(PassWarning::InvalidSettings(e.to_string())))
            }
        };

        let (day_start, day_end) = profile.local_day_bounds(now);
        let sent_today = self
            .store
            .count_sent_between(profile.id, day_start, day_end)
            .await?;
        let local_time = profile.local_time(now).time();

        Ok((
            EvaluationContext {
                profile,
                settings,
                local_time,
                sent_today,
                bypass_quiet_hours: options.bypass_quiet_hours,
            },
            warning,
        ))
    }

    async fn detect(
        &self,
        profile: &ClientProfile,
        threshold_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Trigger>, PortError> {
        let since = now - Duration::days(i64::from(self.config.activity_window_days));
        let snapshot = self.activity.load_activity(profile.id, since).await?;
        Ok(self.detector.detect(profile, threshold_days, &snapshot, now))
    }

    /// A sent trigger is done for good. Otherwise the newest row decides: a
    /// failure waits out the retry delay, and a suppression waits until the
    /// reason it was given no longer applies (quiet hours over or bypassed, a
    /// new local day, settings changed).
    async fn readiness(
        &self,
        ctx: &EvaluationContext,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> Result<Readiness, PortError> {
        let rows = self.store.dispatches_for_trigger(trigger.id).await?;
        if rows.iter().any(|d| d.status == DispatchStatus::Sent) {
            return Ok(Readiness::AlreadySent);
        }
        let Some(latest) = rows.iter().max_by_key(|d| d.sent_at) else {
            return Ok(Readiness::Ready);
        };
        let ready = match &latest.status {
            DispatchStatus::Failed(_) => now - latest.sent_at >= self.config.retry_failed_after,
            DispatchStatus::Suppressed(reason) => {
                ctx.blocking_reason(trigger.category) != Some(*reason)
            }
            DispatchStatus::Sent => false,
        };
        Ok(if ready {
            Readiness::Ready
        } else {
            Readiness::Waiting
        })
    }

    async fn evaluate_trigger(
        &self,
        ctx: &mut EvaluationContext,
        trigger: &Trigger,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> ReminderDispatch {
        let body = match message {
            Some(m) => m.to_string(),
            None => {
                self.composer
                    .compose(trigger, ctx.profile.display_name.as_deref())
                    .body
            }
        };
        let record = |channel: Option<Channel>, status: DispatchStatus, body: String| {
            ReminderDispatch {
                id: Uuid::new_v4(),
                client_id: trigger.client_id,
                trigger_id: trigger.id,
                channel,
                composed_message: body,
                sent_at: now,
                status,
            }
        };

        if let Some(reason) = ctx.blocking_reason(trigger.category) {
            info!(
                client_id = %trigger.client_id,
                trigger_id = %trigger.id,
                reason = reason.as_str(),
                "Reminder suppressed"
            );
            return record(None, DispatchStatus::Suppressed(reason), body);
        }

        match self.deliver(trigger.client_id, &body).await {
            (channel, Ok(())) => {
                ctx.sent_today += 1;
                info!(
                    client_id = %trigger.client_id,
                    trigger_id = %trigger.id,
                    channel = channel.map(Channel::as_str).unwrap_or("none"),
                    "Reminder sent"
                );
                record(channel, DispatchStatus::Sent, body)
            }
            (channel, Err(error)) => {
                warn!(
                    client_id = %trigger.client_id,
                    trigger_id = %trigger.id,
                    %error,
                    "Reminder delivery failed"
                );
                record(channel, DispatchStatus::Failed(error), body)
            }
        }
    }

    /// Tries each configured channel in order until one delivers.
    async fn deliver(&self, client_id: Uuid, body: &str) -> (Option<Channel>, Result<(), String>) {
        let mut errors = Vec::new();
        let mut last = None;
        for &channel in &self.config.channels {
            last = Some(channel);
            let result = self.sender.send(client_id, channel, body).await;
            if result.delivered {
                return (Some(channel), Ok(()));
            }
            errors.push(format!(
                "{}: {}",
                channel.as_str(),
                result.error.unwrap_or_else(|| "not delivered".to_string())
            ));
        }
        if errors.is_empty() {
            errors.push("no delivery channel configured".to_string());
        }
        (last, Err(errors.join("; ")))
    }

    async fn persist(&self, dispatch: &ReminderDispatch) -> Result<(), PortError> {
        self.store.record_dispatch(dispatch).await.map_err(|e| {
            error!(
                client_id = %dispatch.client_id,
                trigger_id = %dispatch.trigger_id,
                status = dispatch.status.as_str(),
                error = %e,
                "Failed to record reminder dispatch"
            );
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorConfig;
    use crate::domain::{ActivityEntry, ActivityKind, Goal, PlanTask, Severity, WeeklyPlan};
    use crate::memory::{MemoryClients, MemoryStore, RecordingSender};
    use crate::ports::ReminderStore;
    use chrono::{NaiveDate, TimeZone};

    struct Harness {
        store: Arc<MemoryStore>,
        clients: Arc<MemoryClients>,
        sender: Arc<RecordingSender>,
        scheduler: Arc<ReminderScheduler>,
        client_id: Uuid,
    }

    /// Noon UTC; the test client lives at UTC.
    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn late_evening() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 22, 30, 0).unwrap()
    }

    async fn harness_with(config: SchedulerConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clients = Arc::new(MemoryClients::new());
        let sender = Arc::new(RecordingSender::new());
        let client_id = Uuid::new_v4();
        let coach_id = Uuid::new_v4();

        clients
            .add_client(ClientProfile {
                id: client_id,
                coach_id,
                display_name: Some("Jordan Reyes".into()),
                utc_offset_minutes: 0,
                created_at: noon() - Duration::days(60),
            })
            .await;
        store
            .save_settings(&ClientReminderSettings::with_defaults(
                client_id,
                coach_id,
                noon() - Duration::days(60),
            ))
            .await
            .unwrap();

        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            clients.clone(),
            clients.clone(),
            sender.clone(),
            TriggerDetector::new(DetectorConfig::default()),
            config,
        ));
        Harness {
            store,
            clients,
            sender,
            scheduler,
            client_id,
        }
    }

    async fn harness() -> Harness {
        harness_with(SchedulerConfig::default()).await
    }

    impl Harness {
        /// Inactive for 5 days (Low), a goal stale 14 days (High) and one
        /// overdue meal task (Low): three triggers.
        async fn seed_three_triggers(&self) {
            self.clients
                .log_activity(
                    self.client_id,
                    ActivityEntry {
                        kind: ActivityKind::DataLog,
                        occurred_at: noon() - Duration::days(5) - Duration::hours(1),
                    },
                )
                .await;
            self.clients
                .add_goal(
                    self.client_id,
                    Goal {
                        id: Uuid::new_v4(),
                        title: "Drink more water".into(),
                        active: true,
                        created_at: noon() - Duration::days(30),
                        last_progress_at: Some(noon() - Duration::days(14)),
                    },
                )
                .await;
            self.clients
                .add_plan(
                    self.client_id,
                    WeeklyPlan {
                        id: Uuid::new_v4(),
                        title: "Week 10".into(),
                        assigned: true,
                        tasks: vec![PlanTask {
                            id: Uuid::new_v4(),
                            title: "Log lunch".into(),
                            due_on: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
                            completed: false,
                        }],
                    },
                )
                .await;
        }

        /// Recent activity and a single task due on the 9th: only a plan
        /// trigger, with the same id on every later day.
        async fn seed_overdue_task(&self) {
            self.clients
                .log_activity(
                    self.client_id,
                    ActivityEntry {
                        kind: ActivityKind::DataLog,
                        occurred_at: at(9, 23, 0),
                    },
                )
                .await;
            self.clients
                .add_plan(
                    self.client_id,
                    WeeklyPlan {
                        id: Uuid::new_v4(),
                        title: "Week 10".into(),
                        assigned: true,
                        tasks: vec![PlanTask {
                            id: Uuid::new_v4(),
                            title: "Log lunch".into(),
                            due_on: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
                            completed: false,
                        }],
                    },
                )
                .await;
        }

        async fn update_settings(&self, f: impl FnOnce(&mut ClientReminderSettings)) {
            let mut settings = self.store.get_settings(self.client_id).await.unwrap().unwrap();
            f(&mut settings);
            self.store.save_settings(&settings).await.unwrap();
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
    }

    fn trigger_at(severity: Severity, minutes: i64) -> Trigger {
        Trigger {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            category: crate::domain::TriggerCategory::Goal,
            severity,
            description: String::new(),
            detected_at: noon() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn dispatch_order_is_severity_then_detection_time() {
        let mut triggers = vec![
            trigger_at(Severity::Low, 0),
            trigger_at(Severity::High, 5),
            trigger_at(Severity::Medium, 1),
            trigger_at(Severity::High, 2),
        ];
        dispatch_order(&mut triggers);
        let order: Vec<_> = triggers.iter().map(|t| (t.severity, t.detected_at)).collect();
        assert_eq!(
            order,
            vec![
                (Severity::High, noon() + Duration::minutes(2)),
                (Severity::High, noon() + Duration::minutes(5)),
                (Severity::Medium, noon() + Duration::minutes(1)),
                (Severity::Low, noon()),
            ]
        );
    }

    #[tokio::test]
    async fn eligible_triggers_are_sent_high_severity_first() {
        let h = harness().await;
        h.seed_three_triggers().await;

        let summary = h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();
        assert_eq!(summary.sent_count, 3);
        assert_eq!(summary.suppressed_count, 0);

        let sent = h.sender.sent().await;
        assert_eq!(sent.len(), 3);
        assert!(sent[0].message.contains("Jordan"));
        assert_eq!(summary.dispatches[0].status, DispatchStatus::Sent);
        let first = h.store.get_trigger(summary.dispatches[0].trigger_id).await.unwrap();
        assert_eq!(first.severity, Severity::High);
    }

    #[tokio::test]
    async fn disabled_master_switch_never_sends() {
        let h = harness().await;
        h.seed_three_triggers().await;
        h.update_settings(|s| s.reminders_enabled = false).await;

        let summary = h
            .scheduler
            .trigger_now(h.client_id, PassOptions { bypass_quiet_hours: true }, noon())
            .await
            .unwrap();
        assert_eq!(summary.sent_count, 0);
        assert_eq!(summary.suppressed_count, 3);
        assert!(summary.dispatches.iter().all(|d| d.status
            == DispatchStatus::Suppressed(SuppressionReason::PolicyDisabled)));
        assert!(h.sender.sent().await.is_empty());
    }

    #[tokio::test]
    async fn daily_cap_limits_sends_across_categories() {
        let h = harness().await;
        h.seed_three_triggers().await;
        h.update_settings(|s| s.max_reminders_per_day = 2).await;

        let summary = h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();
        assert_eq!(summary.sent_count, 2);
        assert_eq!(summary.suppressed_count, 1);
        assert_eq!(
            summary.dispatches[2].status,
            DispatchStatus::Suppressed(SuppressionReason::DailyCap)
        );
    }

    #[tokio::test]
    async fn cap_counts_earlier_sends_from_the_same_local_day() {
        let h = harness().await;
        h.update_settings(|s| s.max_reminders_per_day = 1).await;
        h.store
            .record_dispatch(&ReminderDispatch {
                id: Uuid::new_v4(),
                client_id: h.client_id,
                trigger_id: Uuid::new_v4(),
                channel: Some(Channel::InApp),
                composed_message: "earlier".into(),
                sent_at: noon() - Duration::hours(3),
                status: DispatchStatus::Sent,
            })
            .await
            .unwrap();
        h.seed_three_triggers().await;

        let summary = h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();
        assert_eq!(summary.sent_count, 0);
        assert_eq!(summary.suppressed_count, 3);
    }

    #[tokio::test]
    async fn quiet_hours_suppress_without_consuming_cap() {
        let h = harness().await;
        h.seed_three_triggers().await;

        let summary = h
            .scheduler
            .run_scheduled_pass(h.client_id, late_evening())
            .await
            .unwrap();
        assert_eq!(summary.sent_count, 0);
        assert!(summary.dispatches.iter().all(|d| d.status
            == DispatchStatus::Suppressed(SuppressionReason::QuietHours)
            && d.channel.is_none()));
    }

    #[tokio::test]
    async fn bypass_sends_during_quiet_hours_but_respects_cap() {
        let h = harness().await;
        h.seed_three_triggers().await;
        h.update_settings(|s| s.max_reminders_per_day = 1).await;

        let summary = h
            .scheduler
            .trigger_now(h.client_id, PassOptions { bypass_quiet_hours: true }, late_evening())
            .await
            .unwrap();
        assert_eq!(summary.sent_count, 1);
        assert_eq!(summary.suppressed_count, 2);
        assert!(summary.dispatches[1..].iter().all(|d| d.status
            == DispatchStatus::Suppressed(SuppressionReason::DailyCap)));
    }

    #[tokio::test]
    async fn second_pass_adds_no_rows() {
        let h = harness().await;
        h.seed_three_triggers().await;

        h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();
        let rows_after_first = h.store.all_dispatches().await.len();
        let again = h
            .scheduler
            .run_scheduled_pass(h.client_id, noon() + Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(again.skipped_count, 3);
        assert!(again.dispatches.is_empty());
        assert_eq!(h.store.all_dispatches().await.len(), rows_after_first);
    }

    #[tokio::test]
    async fn missing_settings_suppress_everything_with_a_warning() {
        let store = Arc::new(MemoryStore::new());
        let clients = Arc::new(MemoryClients::new());
        let sender = Arc::new(RecordingSender::new());
        let client_id = Uuid::new_v4();
        clients
            .add_client(ClientProfile {
                id: client_id,
                coach_id: Uuid::new_v4(),
                display_name: None,
                utc_offset_minutes: 0,
                created_at: noon() - Duration::days(20),
            })
            .await;
        let scheduler = ReminderScheduler::new(
            store.clone(),
            clients.clone(),
            clients,
            sender.clone(),
            TriggerDetector::default(),
            SchedulerConfig::default(),
        );

        let summary = scheduler.run_scheduled_pass(client_id, noon()).await.unwrap();
        assert_eq!(summary.warnings, vec![PassWarning::MissingSettings]);
        assert_eq!(summary.sent_count, 0);
        assert_eq!(summary.suppressed_count, 1);
        assert_eq!(
            summary.dispatches[0].status,
            DispatchStatus::Suppressed(SuppressionReason::NoSettings)
        );
        assert!(sender.sent().await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_activity_skips_detection() {
        let h = harness().await;
        h.seed_three_triggers().await;
        h.clients.set_unavailable(h.client_id, true).await;

        let summary = h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();
        assert!(summary.dispatches.is_empty());
        assert!(matches!(
            summary.warnings.as_slice(),
            [PassWarning::DetectorDataUnavailable(_)]
        ));
        assert!(h.store.all_dispatches().await.is_empty());
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_pass_or_consume_cap() {
        let h = harness_with(SchedulerConfig {
            channels: vec![Channel::Sms],
            ..Default::default()
        })
        .await;
        h.seed_three_triggers().await;
        h.update_settings(|s| s.max_reminders_per_day = 1).await;
        h.sender.set_failing(Channel::Sms, true).await;

        let summary = h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();
        assert_eq!(summary.failed_count, 3);
        assert_eq!(summary.suppressed_count, 0);
        assert!(matches!(&summary.dispatches[0].status, DispatchStatus::Failed(e) if e.contains("sms")));
    }

    #[tokio::test]
    async fn failed_triggers_retry_on_a_later_pass_only() {
        let h = harness_with(SchedulerConfig {
            channels: vec![Channel::Sms],
            retry_failed_after: Duration::minutes(15),
            ..Default::default()
        })
        .await;
        h.seed_three_triggers().await;
        h.sender.set_failing(Channel::Sms, true).await;
        h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();

        h.sender.set_failing(Channel::Sms, false).await;
        let immediate = h
            .scheduler
            .run_scheduled_pass(h.client_id, noon() + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(immediate.skipped_count, 3);

        let later = h
            .scheduler
            .run_scheduled_pass(h.client_id, noon() + Duration::minutes(20))
            .await
            .unwrap();
        assert_eq!(later.sent_count, 3);
    }

    #[tokio::test]
    async fn falls_back_to_the_next_channel() {
        let h = harness_with(SchedulerConfig {
            channels: vec![Channel::Sms, Channel::Push],
            ..Default::default()
        })
        .await;
        h.seed_three_triggers().await;
        h.sender.set_failing(Channel::Sms, true).await;

        let summary = h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();
        assert_eq!(summary.sent_count, 3);
        assert!(summary
            .dispatches
            .iter()
            .all(|d| d.channel == Some(Channel::Push)));
    }

    #[tokio::test]
    async fn scheduled_pass_reports_busy_while_client_is_locked() {
        let h = harness().await;
        let _held = h.scheduler.locks.try_acquire(h.client_id).unwrap();
        assert!(matches!(
            h.scheduler.run_scheduled_pass(h.client_id, noon()).await,
            Err(SchedulerError::Busy(_))
        ));
    }

    #[tokio::test]
    async fn manual_trigger_times_out_behind_a_running_pass() {
        let h = harness_with(SchedulerConfig {
            manual_timeout: StdDuration::from_millis(20),
            ..Default::default()
        })
        .await;
        let _held = h.scheduler.locks.try_acquire(h.client_id).unwrap();
        assert!(matches!(
            h.scheduler
                .trigger_now(h.client_id, PassOptions::default(), noon())
                .await,
            Err(SchedulerError::Busy(_))
        ));
    }

    #[tokio::test]
    async fn unknown_client_is_reported() {
        let h = harness().await;
        assert!(matches!(
            h.scheduler.run_scheduled_pass(Uuid::new_v4(), noon()).await,
            Err(SchedulerError::ClientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn preview_then_confirm_sends_the_edited_message() {
        let h = harness().await;
        h.seed_three_triggers().await;

        let previews = h.scheduler.preview(h.client_id, noon()).await.unwrap();
        assert_eq!(previews.len(), 3);
        assert!(h.store.all_dispatches().await.is_empty());

        let meal = previews
            .iter()
            .find(|p| p.trigger.description.contains("lunch"))
            .unwrap();
        assert_eq!(meal.message.template, "nutrition_check_in");

        let dispatch = h
            .scheduler
            .send_confirmed(
                h.client_id,
                meal.trigger.id,
                "Jordan, don't forget lunch today!",
                PassOptions::default(),
                noon(),
            )
            .await
            .unwrap();
        assert_eq!(dispatch.status, DispatchStatus::Sent);
        assert_eq!(h.sender.sent().await[0].message, "Jordan, don't forget lunch today!");

        let again = h
            .scheduler
            .send_confirmed(h.client_id, meal.trigger.id, "again", PassOptions::default(), noon())
            .await;
        assert!(matches!(again, Err(SchedulerError::AlreadyDispatched(_))));
    }

    #[tokio::test]
    async fn confirm_rejects_empty_and_unknown() {
        let h = harness().await;
        assert!(matches!(
            h.scheduler
                .send_confirmed(h.client_id, Uuid::new_v4(), "  ", PassOptions::default(), noon())
                .await,
            Err(SchedulerError::EmptyMessage)
        ));
        assert!(matches!(
            h.scheduler
                .send_confirmed(h.client_id, Uuid::new_v4(), "hi", PassOptions::default(), noon())
                .await,
            Err(SchedulerError::TriggerNotOpen(_))
        ));
    }

    #[tokio::test]
    async fn confirm_still_honors_quiet_hours() {
        let h = harness().await;
        h.seed_three_triggers().await;
        let triggers = h.scheduler.detect_triggers(h.client_id, late_evening()).await.unwrap();

        let dispatch = h
            .scheduler
            .send_confirmed(h.client_id, triggers[0].id, "hello", PassOptions::default(), late_evening())
            .await
            .unwrap();
        assert_eq!(
            dispatch.status,
            DispatchStatus::Suppressed(SuppressionReason::QuietHours)
        );
        assert!(h.sender.sent().await.is_empty());
    }

    #[tokio::test]
    async fn quiet_hours_defer_until_the_window_ends() {
        let h = harness().await;
        h.seed_overdue_task().await;

        let night = h.scheduler.run_scheduled_pass(h.client_id, at(10, 0, 5)).await.unwrap();
        assert_eq!(night.suppressed_count, 1);
        assert_eq!(
            night.dispatches[0].status,
            DispatchStatus::Suppressed(SuppressionReason::QuietHours)
        );

        let still_quiet = h.scheduler.run_scheduled_pass(h.client_id, at(10, 3, 0)).await.unwrap();
        assert_eq!(still_quiet.skipped_count, 1);
        assert!(still_quiet.dispatches.is_empty());
        assert_eq!(h.store.all_dispatches().await.len(), 1);

        let morning = h.scheduler.run_scheduled_pass(h.client_id, at(10, 9, 5)).await.unwrap();
        assert_eq!(morning.sent_count, 1);
        assert_eq!(morning.dispatches[0].trigger_id, night.dispatches[0].trigger_id);
        assert_eq!(h.sender.sent().await.len(), 1);

        let manual = h
            .scheduler
            .trigger_now(h.client_id, PassOptions { bypass_quiet_hours: true }, at(10, 10, 5))
            .await
            .unwrap();
        assert_eq!(manual.skipped_count, 1);
        assert_eq!(manual.sent_count, 0);
        assert_eq!(h.sender.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn capped_trigger_is_sent_on_the_next_local_day() {
        let h = harness().await;
        h.update_settings(|s| s.max_reminders_per_day = 1).await;
        h.store
            .record_dispatch(&ReminderDispatch {
                id: Uuid::new_v4(),
                client_id: h.client_id,
                trigger_id: Uuid::new_v4(),
                channel: Some(Channel::InApp),
                composed_message: "earlier".into(),
                sent_at: at(10, 10, 0),
                status: DispatchStatus::Sent,
            })
            .await
            .unwrap();
        h.seed_overdue_task().await;

        let capped = h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();
        assert_eq!(
            capped.dispatches[0].status,
            DispatchStatus::Suppressed(SuppressionReason::DailyCap)
        );

        let same_day = h.scheduler.run_scheduled_pass(h.client_id, at(10, 13, 0)).await.unwrap();
        assert_eq!(same_day.skipped_count, 1);
        assert!(same_day.dispatches.is_empty());

        let next_day = h.scheduler.run_scheduled_pass(h.client_id, at(11, 9, 5)).await.unwrap();
        assert_eq!(next_day.sent_count, 1);
        assert_eq!(next_day.dispatches[0].trigger_id, capped.dispatches[0].trigger_id);
    }

    #[tokio::test]
    async fn manual_bypass_sends_a_trigger_suppressed_overnight() {
        let h = harness().await;
        h.seed_overdue_task().await;

        let night = h.scheduler.run_scheduled_pass(h.client_id, at(10, 0, 5)).await.unwrap();
        assert_eq!(night.suppressed_count, 1);

        let manual = h
            .scheduler
            .trigger_now(h.client_id, PassOptions { bypass_quiet_hours: true }, at(10, 0, 10))
            .await
            .unwrap();
        assert_eq!(manual.sent_count, 1);
        assert_eq!(manual.skipped_count, 0);
        assert_eq!(h.sender.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn re_enabled_category_sends_its_suppressed_trigger() {
        let h = harness().await;
        h.seed_overdue_task().await;
        h.update_settings(|s| s.plan_reminders_enabled = false).await;

        let disabled = h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();
        assert_eq!(
            disabled.dispatches[0].status,
            DispatchStatus::Suppressed(SuppressionReason::PolicyDisabled)
        );
        let again = h
            .scheduler
            .run_scheduled_pass(h.client_id, noon() + Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(again.skipped_count, 1);

        h.update_settings(|s| s.plan_reminders_enabled = true).await;
        let enabled = h
            .scheduler
            .run_scheduled_pass(h.client_id, noon() + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(enabled.sent_count, 1);
    }

    #[tokio::test]
    async fn ledger_failure_stops_the_pass_after_the_send() {
        let h = harness().await;
        h.seed_three_triggers().await;
        h.store.set_rejecting_dispatches(true);

        let summary = h.scheduler.run_scheduled_pass(h.client_id, noon()).await.unwrap();
        assert_eq!(summary.sent_count, 1);
        assert_eq!(summary.dispatches.len(), 1);
        assert!(matches!(
            summary.warnings.as_slice(),
            [PassWarning::LedgerWriteFailed(_)]
        ));
        assert_eq!(h.sender.sent().await.len(), 1);
        assert!(h.store.all_dispatches().await.is_empty());
    }

    #[tokio::test]
    async fn confirmed_send_reports_a_ledger_failure() {
        let h = harness().await;
        h.seed_three_triggers().await;
        let triggers = h.scheduler.detect_triggers(h.client_id, noon()).await.unwrap();
        h.store.set_rejecting_dispatches(true);

        let result = h
            .scheduler
            .send_confirmed(h.client_id, triggers[0].id, "hello", PassOptions::default(), noon())
            .await;
        assert!(matches!(result, Err(SchedulerError::Port(PortError::Unavailable(_)))));
    }
}
