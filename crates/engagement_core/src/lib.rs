pub mod composer;
pub mod detector;
pub mod domain;
pub mod locks;
pub mod memory;
pub mod policy;
pub mod ports;
pub mod scheduler;

pub use composer::{ComposedMessage, MessageComposer};
pub use detector::{DetectorConfig, TriggerDetector};
pub use domain::{
    ActivityEntry, ActivityKind, ActivitySnapshot, Channel, ClientProfile, ClientReminderSettings,
    DeliveryResult, DispatchStatus, Goal, PlanTask, ReminderDispatch, ReminderSettingsUpdate,
    Severity, SettingsError, SuppressionReason, Trigger, TriggerCategory, WeeklyPlan,
};
pub use ports::{
    ActivitySource, ClientDirectory, NotificationSender, PortError, PortResult, ReminderStore,
};
pub use scheduler::{
    PassOptions, PassSummary, PassWarning, ReminderPreview, ReminderScheduler, SchedulerConfig,
    SchedulerError,
};
