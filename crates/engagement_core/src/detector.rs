//! crates/engagement_core/src/detector.rs
//!
//! Turns a client's activity snapshot into the set of outstanding triggers.
//!
//! Trigger ids are derived from the underlying condition, so detecting the
//! same unresolved condition twice yields the same trigger, while any change
//! in the condition (new activity, escalation, a different overdue task)
//! yields a fresh one.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ActivitySnapshot, ClientProfile, Goal, PlanTask, Severity, Trigger, TriggerCategory,
    WeeklyPlan,
};

const TRIGGER_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a7e_93d4_4b8a_a5e0_4c1d_7b22_90e3);

pub const DEFAULT_GOAL_STALENESS_DAYS: u32 = 7;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Days without a progress update before an active goal counts as stale.
    pub goal_staleness_days: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            goal_staleness_days: DEFAULT_GOAL_STALENESS_DAYS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TriggerDetector {
    config: DetectorConfig,
}

impl TriggerDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Runs every rule. The result holds at most one trigger per category.
    pub fn detect(
        &self,
        client: &ClientProfile,
        inactivity_threshold_days: u32,
        activity: &ActivitySnapshot,
        now: DateTime<Utc>,
    ) -> Vec<Trigger> {
        [
            self.detect_goal(client, &activity.goals, now),
            self.detect_plan(client, &activity.plans, now),
            self.detect_inactivity(client, inactivity_threshold_days, activity, now),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn detect_inactivity(
        &self,
        client: &ClientProfile,
        threshold_days: u32,
        activity: &ActivitySnapshot,
        now: DateTime<Utc>,
    ) -> Option<Trigger> {
        let last_activity = activity
            .entries
            .iter()
            .filter(|e| e.kind.is_qualifying())
            .map(|e| e.occurred_at)
            .max()
            .max(activity.last_qualifying_at);
        let anchor = last_activity.unwrap_or(client.created_at).min(now);
        let days_inactive = (now - anchor).num_days();
        let threshold = i64::from(threshold_days);
        if days_inactive < threshold {
            return None;
        }

        let severity = if days_inactive <= threshold + 1 {
            Severity::Medium
        } else if days_inactive > threshold + 3 {
            Severity::High
        } else {
            Severity::Low
        };

        let description = match last_activity {
            Some(_) => format!("No activity logged in {days_inactive} days"),
            None => format!("No activity logged since joining {days_inactive} days ago"),
        };
        let key = format!("{}:{}", anchor.timestamp(), severity.as_str());

        Some(build_trigger(
            client,
            TriggerCategory::Inactivity,
            severity,
            description,
            &key,
            now,
        ))
    }

    fn detect_goal(
        &self,
        client: &ClientProfile,
        goals: &[Goal],
        now: DateTime<Utc>,
    ) -> Option<Trigger> {
        let window = i64::from(self.config.goal_staleness_days);
        let (goal, last_update, stale_days) = goals
            .iter()
            .filter(|g| g.active)
            .map(|g| {
                let last = g.last_progress_at.unwrap_or(g.created_at).min(now);
                (g, last, (now - last).num_days())
            })
            .filter(|(_, _, stale)| *stale >= window)
            .max_by(|a, b| a.2.cmp(&b.2).then_with(|| b.0.id.cmp(&a.0.id)))?;

        let severity = match stale_days - window {
            0..=2 => Severity::Low,
            3..=6 => Severity::Medium,
            _ => Severity::High,
        };
        let description = format!(
            "Goal '{}' has had no progress update in {stale_days} days",
            goal.title
        );
        let key = format!("{}:{}:{}", goal.id, last_update.timestamp(), severity.as_str());

        Some(build_trigger(
            client,
            TriggerCategory::Goal,
            severity,
            description,
            &key,
            now,
        ))
    }

    fn detect_plan(
        &self,
        client: &ClientProfile,
        plans: &[WeeklyPlan],
        now: DateTime<Utc>,
    ) -> Option<Trigger> {
        let today = client.local_time(now).date_naive();
        let mut overdue: Vec<(&WeeklyPlan, &PlanTask)> = plans
            .iter()
            .filter(|p| p.assigned)
            .flat_map(|p| p.tasks.iter().map(move |t| (p, t)))
            .filter(|(_, t)| !t.completed && t.due_on < today)
            .collect();
        if overdue.is_empty() {
            return None;
        }
        overdue.sort_by(|a, b| a.1.due_on.cmp(&b.1.due_on).then_with(|| a.1.id.cmp(&b.1.id)));

        let count = overdue.len();
        let severity = match count {
            1 => Severity::Low,
            2..=3 => Severity::Medium,
            _ => Severity::High,
        };
        let (plan, earliest) = overdue[0];
        let description = format!(
            "{count} overdue task{} in weekly plan '{}', earliest: '{}' due {}",
            if count == 1 { "" } else { "s" },
            plan.title,
            earliest.title,
            earliest.due_on.format("%Y-%m-%d"),
        );
        let key = overdue
            .iter()
            .map(|(_, t)| t.id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        Some(build_trigger(
            client,
            TriggerCategory::Plan,
            severity,
            description,
            &key,
            now,
        ))
    }
}

fn build_trigger(
    client: &ClientProfile,
    category: TriggerCategory,
    severity: Severity,
    description: String,
    condition_key: &str,
    now: DateTime<Utc>,
) -> Trigger {
    let name = format!("{}:{}:{}", client.id, category.as_str(), condition_key);
    Trigger {
        id: Uuid::new_v5(&TRIGGER_NAMESPACE, name.as_bytes()),
        client_id: client.id,
        category,
        severity,
        description,
        detected_at: now,
    }
}
