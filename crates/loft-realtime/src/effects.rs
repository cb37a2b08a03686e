//! Side effects of a reconciled event, and the executor that runs them.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use loft_types::models::NotificationKind;

use crate::events::{AppEvent, EventBus};
use crate::sound::SoundDispatcher;

#[derive(Debug, Error, PartialEq)]
pub enum EffectError {
    #[error("audio output failed: {0}")]
    Audio(String),

    #[error("toast failed: {0}")]
    Toast(String),

    #[error("desktop notification failed: {0}")]
    Desktop(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopPermission {
    Default,
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToastAction {
    pub label: String,
    /// In-app route opened by the action.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    pub duration: Duration,
    pub action: Option<ToastAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesktopNotification {
    pub title: String,
    pub body: String,
    /// Notifications sharing a tag replace each other.
    pub tag: String,
    pub link: Option<String>,
    pub require_interaction: bool,
    /// `None` leaves closing to the user or the platform.
    pub auto_dismiss: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PlaySound(NotificationKind),
    ShowToast(Toast),
    ShowDesktop(DesktopNotification),
    Dispatch(AppEvent),
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlaySound(_) => "sound",
            Self::ShowToast(_) => "toast",
            Self::ShowDesktop(_) => "desktop",
            Self::Dispatch(_) => "dispatch",
        }
    }
}

/// Where toasts and desktop notifications end up.
pub trait Presenter: Send + Sync {
    fn show_toast(&self, toast: &Toast) -> Result<(), EffectError>;

    fn show_desktop(&self, notification: &DesktopNotification) -> Result<(), EffectError>;

    fn permission(&self) -> DesktopPermission;

    /// Ask the user once. Returns the resulting permission.
    fn request_permission(&self) -> DesktopPermission;
}

/// Run every effect in order. A failing effect is logged and collected;
/// the rest still run.
pub fn execute(
    effects: Vec<Effect>,
    presenter: &dyn Presenter,
    sound: &SoundDispatcher,
    bus: &EventBus,
) -> Vec<EffectError> {
    let mut failures = Vec::new();
    for effect in effects {
        let result = match &effect {
            Effect::PlaySound(kind) => sound.play(*kind).map(|_| ()),
            Effect::ShowToast(toast) => presenter.show_toast(toast),
            Effect::ShowDesktop(notification) => presenter.show_desktop(notification),
            Effect::Dispatch(event) => {
                let listeners = bus.publish(event.clone());
                debug!(event = event.name(), listeners, "dispatched");
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!(effect = effect.name(), "effect failed: {}", e);
            failures.push(e);
        }
    }
    failures
}

/// Logs toasts and desktop notifications instead of drawing them.
pub struct TracingPresenter {
    permission: Mutex<DesktopPermission>,
}

impl TracingPresenter {
    pub fn new(permission: DesktopPermission) -> Self {
        Self {
            permission: Mutex::new(permission),
        }
    }
}

impl Presenter for TracingPresenter {
    fn show_toast(&self, toast: &Toast) -> Result<(), EffectError> {
        info!(
            kind = toast.kind.as_str(),
            title = %toast.title,
            description = %toast.description,
            action = toast.action.as_ref().map(|a| a.target.as_str()).unwrap_or(""),
            "toast"
        );
        Ok(())
    }

    fn show_desktop(&self, notification: &DesktopNotification) -> Result<(), EffectError> {
        info!(
            title = %notification.title,
            body = %notification.body,
            tag = %notification.tag,
            require_interaction = notification.require_interaction,
            "desktop notification"
        );
        Ok(())
    }

    fn permission(&self) -> DesktopPermission {
        *self.permission.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A terminal can always print, so a pending request is granted.
    fn request_permission(&self) -> DesktopPermission {
        let mut permission = self.permission.lock().unwrap_or_else(|e| e.into_inner());
        if *permission == DesktopPermission::Default {
            *permission = DesktopPermission::Granted;
        }
        *permission
    }
}
