//! crates/engagement_core/src/composer.rs
//!
//! Maps a trigger to a friendly, personalized message.
//!
//! Templates are chosen by walking an ordered rule table; the first rule whose
//! matcher accepts the trigger wins. Adding a template means adding a row.

use uuid::Uuid;

use crate::domain::{Trigger, TriggerCategory};

/// Placeholder replaced with the recipient's first name.
const NAME: &str = "{name}";

#[derive(Debug, Clone)]
pub enum Matcher {
    /// Any of the keywords appears as a whole word in the description.
    Keywords(&'static [&'static str]),
    Category(TriggerCategory),
    Always,
}

impl Matcher {
    fn matches(&self, trigger: &Trigger, words: &[String]) -> bool {
        match self {
            Matcher::Keywords(keywords) => keywords
                .iter()
                .any(|k| words.iter().any(|w| w == k)),
            Matcher::Category(category) => trigger.category == *category,
            Matcher::Always => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateRule {
    pub name: &'static str,
    pub matcher: Matcher,
    pub template: &'static str,
}

/// A composed message, ready to be shown in an editable field before sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub trigger_id: Uuid,
    pub template: &'static str,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct MessageComposer {
    rules: Vec<TemplateRule>,
}

impl Default for MessageComposer {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl MessageComposer {
    /// Builds a composer from an ordered rule list. A catch-all generic rule
    /// is appended so composition never comes back empty.
    pub fn new(mut rules: Vec<TemplateRule>) -> Self {
        rules.push(generic_rule());
        Self { rules }
    }

    pub fn compose(&self, trigger: &Trigger, recipient_name: Option<&str>) -> ComposedMessage {
        let words = words_of(&trigger.description);
        let rule = self
            .rules
            .iter()
            .find(|r| r.matcher.matches(trigger, &words))
            .unwrap_or(&GENERIC);
        let body = rule.template.replace(NAME, first_name(recipient_name));

        ComposedMessage {
            trigger_id: trigger.id,
            template: rule.name,
            body,
        }
    }
}

/// The first word of the display name, or "there".
pub fn first_name(display_name: Option<&str>) -> &str {
    display_name
        .and_then(|n| n.split_whitespace().next())
        .unwrap_or("there")
}

fn words_of(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

const GENERIC: TemplateRule = TemplateRule {
    name: "generic_check_in",
    matcher: Matcher::Always,
    template: "Hi {name}, just checking in to see how things are going. Reply any time if there's something I can help with!",
};

fn generic_rule() -> TemplateRule {
    GENERIC
}

fn default_rules() -> Vec<TemplateRule> {
    vec![
        TemplateRule {
            name: "nutrition_check_in",
            matcher: Matcher::Keywords(&[
                "meal", "meals", "lunch", "breakfast", "dinner", "snack", "nutrition", "food",
            ]),
            template: "Hi {name}! Quick nutrition check-in: how have your meals been going? Log today's lunch when you get a chance so we can keep your plan on track.",
        },
        TemplateRule {
            name: "training_adjustment",
            matcher: Matcher::Keywords(&[
                "workout", "workouts", "routine", "training", "exercise",
            ]),
            template: "Hi {name}, it looks like your routine slipped a little this week. Want me to adjust your workouts so they fit your schedule better?",
        },
        TemplateRule {
            name: "general_check_in",
            matcher: Matcher::Keywords(&["login", "logins", "hours", "activity", "logged"]),
            template: "Hey {name}, we haven't heard from you in a bit. How are things going? Logging even one quick update helps us stay on track together.",
        },
        TemplateRule {
            name: "goal_progress",
            matcher: Matcher::Category(TriggerCategory::Goal),
            template: "Hi {name}, how are you progressing toward your goal? Share a quick update when you can, every bit of progress counts.",
        },
        TemplateRule {
            name: "plan_follow_up",
            matcher: Matcher::Category(TriggerCategory::Plan),
            template: "Hi {name}, a few items from this week's plan are still open. Want to pick one to tackle today?",
        },
    ]
}
