//! In-memory collaborators for session and subscription tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use loft_types::api::UnreadByConversation;
use loft_types::events::{ChangeKind, RawChange, Table};
use loft_types::models::{Conversation, NotificationKind};

use crate::counts::CountSource;
use crate::effects::{DesktopNotification, DesktopPermission, EffectError, Presenter, Toast};
use crate::error::{RealtimeError, Result};
use crate::sound::{AudioOutput, SoundCue};
use crate::subscription::{ChangeStream, RealtimeTransport, SubscriptionSpec};

/// Transport whose change channels are fed by the test.
#[derive(Default)]
pub(crate) struct ChannelTransport {
    senders: Mutex<HashMap<Table, mpsc::Sender<RawChange>>>,
    fail_first: u32,
    attempts: AtomicU32,
    closed: Arc<AtomicU32>,
}

impl ChannelTransport {
    /// Fails the first `n` subscribe attempts.
    pub(crate) fn failing(n: u32) -> Self {
        Self {
            fail_first: n,
            ..Default::default()
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn push(&self, table: Table, kind: ChangeKind, new: Value) {
        let sender = self.senders.lock().unwrap().get(&table).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(RawChange { table, kind, new, old: None }).await;
        }
    }
}

impl RealtimeTransport for ChannelTransport {
    fn subscribe<'a>(&'a self, spec: &'a SubscriptionSpec) -> BoxFuture<'a, Result<ChangeStream>> {
        Box::pin(async move {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                return Err(RealtimeError::Subscribe("channel unavailable".into()));
            }
            let (tx, rx) = mpsc::channel(64);
            self.senders.lock().unwrap().insert(spec.table, tx);
            let closed = self.closed.clone();
            Ok(ChangeStream::new(
                rx,
                Some(Box::new(move || {
                    closed.fetch_add(1, Ordering::SeqCst);
                })),
            ))
        })
    }
}

/// Server stand-in with settable counts.
#[derive(Default)]
pub(crate) struct MockCounts {
    pub messages: AtomicU32,
    pub notifications: AtomicU32,
    pub unread: Mutex<UnreadByConversation>,
    pub conversations: Mutex<Vec<Conversation>>,
    pub fail: AtomicBool,
    pub count_calls: AtomicU32,
    pub mark_read_calls: AtomicU32,
    pub fail_mark_read: AtomicBool,
    /// When set, mark-read waits for a notification before answering.
    pub mark_read_gate: Option<Arc<Notify>>,
}

impl MockCounts {
    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RealtimeError::Status { status: 500 });
        }
        Ok(())
    }
}

impl CountSource for MockCounts {
    fn unread_messages(&self) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self.messages.load(Ordering::SeqCst))
        })
    }

    fn unread_notifications(&self) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.notifications.load(Ordering::SeqCst))
        })
    }

    fn unread_by_conversation(&self) -> BoxFuture<'_, Result<UnreadByConversation>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.unread.lock().unwrap().clone())
        })
    }

    fn conversations(&self) -> BoxFuture<'_, Result<Vec<Conversation>>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.conversations.lock().unwrap().clone())
        })
    }

    fn mark_conversation_read(&self, _conversation_id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.mark_read_gate {
                gate.notified().await;
            }
            if self.fail_mark_read.load(Ordering::SeqCst) {
                return Err(RealtimeError::Status { status: 503 });
            }
            Ok(())
        })
    }
}

pub(crate) struct RecordingPresenter {
    pub toasts: Mutex<Vec<Toast>>,
    pub desktop: Mutex<Vec<DesktopNotification>>,
    pub permission: Mutex<DesktopPermission>,
    pub permission_requests: AtomicU32,
}

impl RecordingPresenter {
    pub(crate) fn new(permission: DesktopPermission) -> Self {
        Self {
            toasts: Mutex::default(),
            desktop: Mutex::default(),
            permission: Mutex::new(permission),
            permission_requests: AtomicU32::new(0),
        }
    }

    pub(crate) fn toast_titles(&self) -> Vec<String> {
        self.toasts.lock().unwrap().iter().map(|t| t.title.clone()).collect()
    }
}

impl Presenter for RecordingPresenter {
    fn show_toast(&self, toast: &Toast) -> std::result::Result<(), EffectError> {
        self.toasts.lock().unwrap().push(toast.clone());
        Ok(())
    }

    fn show_desktop(&self, notification: &DesktopNotification) -> std::result::Result<(), EffectError> {
        self.desktop.lock().unwrap().push(notification.clone());
        Ok(())
    }

    fn permission(&self) -> DesktopPermission {
        *self.permission.lock().unwrap()
    }

    fn request_permission(&self) -> DesktopPermission {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        let mut permission = self.permission.lock().unwrap();
        *permission = DesktopPermission::Granted;
        *permission
    }
}

#[derive(Default)]
pub(crate) struct RecordingAudio {
    pub cues: Mutex<Vec<NotificationKind>>,
}

impl AudioOutput for RecordingAudio {
    fn play(&self, cue: &SoundCue) -> std::result::Result<(), EffectError> {
        self.cues.lock().unwrap().push(cue.kind);
        Ok(())
    }
}
