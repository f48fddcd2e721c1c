//! crates/engagement_core/src/policy.rs
//!
//! Pure eligibility rules for a single trigger category. The daily cap is
//! cross-category state and lives in the scheduler, not here.

use chrono::NaiveTime;

use crate::domain::{ClientReminderSettings, SuppressionReason, TriggerCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(SuppressionReason),
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Whether `now` falls inside the quiet window. The start is inside the
/// window, the end is not. `start > end` wraps across midnight and
/// `start == end` is an empty window.
pub fn in_quiet_hours(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

/// Decides whether `category` may fire at client-local `now`.
///
/// `bypass_quiet_hours` skips only the quiet-hours check; the master switch
/// and category toggles still apply.
pub fn evaluate(
    settings: &ClientReminderSettings,
    category: TriggerCategory,
    now: NaiveTime,
    bypass_quiet_hours: bool,
) -> Eligibility {
    if !settings.reminders_enabled || !settings.category_enabled(category) {
        return Eligibility::Ineligible(SuppressionReason::PolicyDisabled);
    }
    if !bypass_quiet_hours
        && in_quiet_hours(settings.quiet_hours_start, settings.quiet_hours_end, now)
    {
        return Eligibility::Ineligible(SuppressionReason::QuietHours);
    }
    Eligibility::Eligible
}

/// The plain boolean form: `remindersEnabled AND categoryEnabled AND NOT inQuietHours`.
pub fn is_eligible(
    settings: &ClientReminderSettings,
    category: TriggerCategory,
    now: NaiveTime,
) -> bool {
    evaluate(settings, category, now, false).is_eligible()
}
