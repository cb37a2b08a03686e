//! Pure planning: what a change event should cause, as a list of effects.
//! Counter updates happen in the session before planning.

use loft_types::models::{Message, Notification, NotificationKind};

use crate::config::RealtimeConfig;
use crate::effects::{DesktopNotification, DesktopPermission, Effect, Toast, ToastAction};
use crate::events::AppEvent;

const DEFAULT_SENDER: &str = "Someone";

pub struct PlanContext<'a> {
    pub config: &'a RealtimeConfig,
    pub permission: DesktopPermission,
}

/// `count` is the unread notification count after this event was applied.
pub fn plan_notification(n: &Notification, count: u32, ctx: &PlanContext<'_>) -> Vec<Effect> {
    let mut effects = vec![
        Effect::PlaySound(n.kind),
        Effect::ShowToast(Toast {
            kind: n.kind,
            title: n.title.clone(),
            description: n.message.clone(),
            duration: ctx.config.toast_duration,
            action: n.link.as_ref().map(|link| ToastAction {
                label: "View".into(),
                target: link.clone(),
            }),
        }),
    ];

    if ctx.permission == DesktopPermission::Granted {
        let task = n.is_task_related();
        effects.push(Effect::ShowDesktop(DesktopNotification {
            title: n.title.clone(),
            body: n.message.clone(),
            tag: n.id.to_string(),
            link: n.link.clone(),
            require_interaction: task,
            auto_dismiss: (!task).then_some(ctx.config.desktop_auto_dismiss),
        }));
    }

    effects.push(Effect::Dispatch(AppEvent::NotificationReceived { kind: n.kind, count }));
    effects
}

/// `conversation_name` is the locally known name, if any.
pub fn plan_message(m: &Message, conversation_name: Option<&str>, ctx: &PlanContext<'_>) -> Vec<Effect> {
    let sender = sender_name(m);
    let conversation_name = conversation_name
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| sender.clone());
    let title = format!("New message from {sender}");
    let target = format!("/conversations/{}", m.conversation_id);

    let mut effects = vec![Effect::ShowToast(Toast {
        kind: NotificationKind::Success,
        title: title.clone(),
        description: preview(&m.content, ctx.config.preview_chars),
        duration: ctx.config.toast_duration,
        action: Some(ToastAction {
            label: "View".into(),
            target: target.clone(),
        }),
    })];

    if ctx.permission == DesktopPermission::Granted {
        effects.push(Effect::ShowDesktop(DesktopNotification {
            title,
            body: m.content.clone(),
            tag: m.conversation_id.to_string(),
            link: Some(target),
            require_interaction: false,
            auto_dismiss: None,
        }));
    }

    effects.push(Effect::Dispatch(AppEvent::NewMessageReceived {
        message: m.clone(),
        sender_name: sender,
        conversation_name,
    }));
    effects
}

pub fn sender_name(m: &Message) -> String {
    m.sender
        .as_ref()
        .map(|p| p.full_name.trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_SENDER)
        .to_string()
}

/// First `max_chars` characters, with `...` appended when cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use loft_types::models::{MessageType, Profile};

    use super::*;

    fn notification(link: Option<&str>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Cleaning assigned".into(),
            message: "Loft 4 before 14:00".into(),
            kind: NotificationKind::Warning,
            link: link.map(str::to_string),
            is_read: false,
            created_at: Utc::now(),
            read_at: None,
        }
    }

    fn message(content: &str, sender: Option<&str>) -> Message {
        let sender_id = Uuid::new_v4();
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id,
            content: content.into(),
            message_type: MessageType::Text,
            created_at: Utc::now(),
            edited: false,
            sender: sender.map(|name| Profile {
                id: sender_id,
                full_name: name.into(),
                email: None,
            }),
        }
    }

    #[test]
    fn long_content_is_cut_to_fifty_chars() {
        let content = "x".repeat(80);
        let cut = preview(&content, 50);
        assert_eq!(cut, format!("{}...", "x".repeat(50)));
        assert_eq!(cut.chars().count(), 53);

        assert_eq!(preview(&"y".repeat(50), 50), "y".repeat(50));
        assert_eq!(preview("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn task_notifications_stay_until_dismissed() {
        let config = RealtimeConfig::default();
        let ctx = PlanContext { config: &config, permission: DesktopPermission::Granted };

        let effects = plan_notification(&notification(Some("/tasks/42")), 3, &ctx);
        let Some(Effect::ShowDesktop(desktop)) = effects.iter().find(|e| e.name() == "desktop") else {
            panic!("desktop notification missing");
        };
        assert!(desktop.require_interaction);
        assert_eq!(desktop.auto_dismiss, None);

        let effects = plan_notification(&notification(Some("/bills/7")), 3, &ctx);
        let Some(Effect::ShowDesktop(desktop)) = effects.iter().find(|e| e.name() == "desktop") else {
            panic!("desktop notification missing");
        };
        assert!(!desktop.require_interaction);
        assert_eq!(desktop.auto_dismiss, Some(config.desktop_auto_dismiss));
    }

    #[test]
    fn notification_plan_order_and_permission() {
        let config = RealtimeConfig::default();
        let n = notification(None);

        let denied = PlanContext { config: &config, permission: DesktopPermission::Denied };
        let names: Vec<_> = plan_notification(&n, 1, &denied).iter().map(Effect::name).collect();
        assert_eq!(names, ["sound", "toast", "dispatch"]);

        let granted = PlanContext { config: &config, permission: DesktopPermission::Granted };
        let effects = plan_notification(&n, 1, &granted);
        let names: Vec<_> = effects.iter().map(Effect::name).collect();
        assert_eq!(names, ["sound", "toast", "desktop", "dispatch"]);
        assert_eq!(
            effects.last(),
            Some(&Effect::Dispatch(AppEvent::NotificationReceived {
                kind: NotificationKind::Warning,
                count: 1
            }))
        );
        let Effect::ShowToast(toast) = &effects[1] else { panic!() };
        assert!(toast.action.is_none());
    }

    #[test]
    fn message_names_fall_back_to_sender() {
        let config = RealtimeConfig::default();
        let ctx = PlanContext { config: &config, permission: DesktopPermission::Default };

        let anonymous = message("hi", None);
        let Some(Effect::Dispatch(AppEvent::NewMessageReceived { sender_name, conversation_name, .. })) =
            plan_message(&anonymous, None, &ctx).pop()
        else {
            panic!("missing dispatch");
        };
        assert_eq!(sender_name, "Someone");
        assert_eq!(conversation_name, "Someone");

        let named = message("hi", Some("Inès Roux"));
        let effects = plan_message(&named, Some("Loft 3"), &ctx);
        let Effect::ShowToast(toast) = &effects[0] else { panic!() };
        assert_eq!(toast.title, "New message from Inès Roux");
        assert_eq!(
            toast.action.as_ref().map(|a| a.target.clone()),
            Some(format!("/conversations/{}", named.conversation_id))
        );
        let Some(Effect::Dispatch(AppEvent::NewMessageReceived { conversation_name, .. })) = effects.last() else {
            panic!();
        };
        assert_eq!(conversation_name, "Loft 3");
    }
}
