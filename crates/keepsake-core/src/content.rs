//! Notification text per event category.

use minijinja::Environment;
use serde::Serialize;

use crate::event::{CategoryKind, Event};
use crate::settings::ReminderOffset;

const DEFAULT_RELATIONSHIP: &str = "someone special";

struct Template {
    title: &'static str,
    body: &'static str,
}

const TEMPLATES: &[(CategoryKind, Template)] = &[
    (
        CategoryKind::Birthday,
        Template {
            title: "{{ name }}'s birthday is coming up",
            body: "It's {{ when }}. Time to celebrate your {{ relationship }}.",
        },
    ),
    (
        CategoryKind::Anniversary,
        Template {
            title: "Anniversary reminder for {{ name }}",
            body: "It's {{ when }}. Plan something meaningful for your {{ relationship }}.",
        },
    ),
    (
        CategoryKind::Memorial,
        Template {
            title: "Remembering {{ name }}",
            body: "It's {{ when }}. Hold your {{ relationship }} close today.",
        },
    ),
];

const FALLBACK: Template = Template {
    title: "Upcoming moment with {{ name }}",
    body: "It's {{ when }}. A perfect time for your {{ relationship }}.",
};

/// Values a template can refer to.
#[derive(Debug, Clone, Serialize)]
struct AlertContext<'a> {
    name: &'a str,
    when: String,
    relationship: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertText {
    pub title: String,
    pub body: String,
}

/// Fills the category template for one `(event, offset)` pair.
///
/// User text is passed as template values, never as template source, so
/// braces in names or relationships come through verbatim.
pub fn render(event: &Event, offset: ReminderOffset) -> Result<AlertText, minijinja::Error> {
    let template = TEMPLATES
        .iter()
        .find(|(kind, _)| *kind == event.category)
        .map(|(_, template)| template)
        .unwrap_or(&FALLBACK);

    let ctx = AlertContext {
        name: event.display_name(),
        when: offset.relative_phrase(),
        relationship: event
            .relationship
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_RELATIONSHIP),
    };

    // Templates are static strings, so one throwaway environment per render.
    let env = Environment::new();
    Ok(AlertText {
        title: env.render_str(template.title, &ctx)?,
        body: env.render_str(template.body, &ctx)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::render;
    use crate::event::{CategoryKind, Event};
    use crate::settings::ReminderOffset;

    fn event(category: CategoryKind) -> Event {
        let now = Utc
            .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .expect("valid now");
        Event::new("Big day", now, true, now).with_category(category)
    }

    #[test]
    fn birthday_uses_person_and_relationship() {
        let e = event(CategoryKind::Birthday).with_person("Ada", "sister");
        let text = render(&e, ReminderOffset::ONE_DAY).expect("render");
        assert_eq!(text.title, "Ada's birthday is coming up");
        assert_eq!(text.body, "It's tomorrow. Time to celebrate your sister.");
    }

    #[test]
    fn memorial_template() {
        let e = event(CategoryKind::Memorial).with_person("Grandpa", "grandfather");
        let text = render(&e, ReminderOffset::DAY_OF).expect("render");
        assert_eq!(text.title, "Remembering Grandpa");
        assert_eq!(text.body, "It's today. Hold your grandfather close today.");
    }

    #[test]
    fn unlisted_categories_fall_back_to_default_text() {
        for kind in [CategoryKind::Milestone, CategoryKind::JustBecause, CategoryKind::Other] {
            let text = render(&event(kind), ReminderOffset::SEVEN_DAYS).expect("render");
            assert_eq!(text.title, "Upcoming moment with Big day");
            assert_eq!(
                text.body,
                "It's in 7 days. A perfect time for your someone special."
            );
        }
    }

    #[test]
    fn braces_in_user_text_are_not_expanded() {
        let e = event(CategoryKind::Birthday).with_person("Team {when}", "{name} {{ when }}");
        let text = render(&e, ReminderOffset::ONE_DAY).expect("render");
        assert_eq!(text.title, "Team {when}'s birthday is coming up");
        assert_eq!(
            text.body,
            "It's tomorrow. Time to celebrate your {name} {{ when }}."
        );
    }

    #[test]
    fn blank_relationship_uses_default() {
        let e = event(CategoryKind::Anniversary).with_person("Sam", "  ");
        let text = render(&e, ReminderOffset::DAY_OF).expect("render");
        assert_eq!(
            text.body,
            "It's today. Plan something meaningful for your someone special."
        );
    }
}
