//! services/api/src/adapters/demo.rs
//!
//! Seeds a sample client into the in-memory client directory so a server
//! started without `DATABASE_URL` has something to detect triggers for.

use chrono::{DateTime, Duration, Utc};
use engagement_core::domain::{
    ActivityEntry, ActivityKind, ClientProfile, Goal, PlanTask, WeeklyPlan,
};
use engagement_core::memory::MemoryClients;
use uuid::Uuid;

/// Fixed so the id printed at startup stays the same across restarts.
pub const DEMO_CLIENT_ID: Uuid = Uuid::from_u128(0x5eed_c0ac_0000_4000_8000_000000000001);
pub const DEMO_COACH_ID: Uuid = Uuid::from_u128(0x5eed_c0ac_0000_4000_8000_000000000002);

/// Adds a client who last logged data four days ago, has a goal with no
/// progress for ten days and two overdue plan tasks. Returns the client id.
pub async fn seed_demo_client(clients: &MemoryClients, now: DateTime<Utc>) -> Uuid {
    clients
        .add_client(ClientProfile {
            id: DEMO_CLIENT_ID,
            coach_id: DEMO_COACH_ID,
            display_name: Some("Alex Morgan".to_string()),
            utc_offset_minutes: 0,
            created_at: now - Duration::days(45),
        })
        .await;

    for (days_ago, kind) in [
        (12, ActivityKind::Session),
        (6, ActivityKind::TaskCompletion),
        (4, ActivityKind::DataLog),
        (1, ActivityKind::Login),
    ] {
        clients
            .log_activity(
                DEMO_CLIENT_ID,
                ActivityEntry {
                    kind,
                    occurred_at: now - Duration::days(days_ago),
                },
            )
            .await;
    }

    clients
        .add_goal(
            DEMO_CLIENT_ID,
            Goal {
                id: Uuid::new_v4(),
                title: "Walk 8,000 steps a day".to_string(),
                active: true,
                created_at: now - Duration::days(40),
                last_progress_at: Some(now - Duration::days(10)),
            },
        )
        .await;

    let today = now.date_naive();
    clients
        .add_plan(
            DEMO_CLIENT_ID,
            WeeklyPlan {
                id: Uuid::new_v4(),
                title: "This week".to_string(),
                assigned: true,
                tasks: vec![
                    PlanTask {
                        id: Uuid::new_v4(),
                        title: "Meal prep for the week".to_string(),
                        due_on: today - Duration::days(3),
                        completed: false,
                    },
                    PlanTask {
                        id: Uuid::new_v4(),
                        title: "Evening stretch".to_string(),
                        due_on: today - Duration::days(1),
                        completed: false,
                    },
                    PlanTask {
                        id: Uuid::new_v4(),
                        title: "Weigh-in".to_string(),
                        due_on: today - Duration::days(2),
                        completed: true,
                    },
                ],
            },
        )
        .await;

    DEMO_CLIENT_ID
}
