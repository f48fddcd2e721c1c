pub mod db;
pub mod demo;
pub mod notifier;

pub use db::DbAdapter;
pub use notifier::{LogNotificationSender, WebhookNotificationSender};
