use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use loft_types::events::{ColumnFilter, RawChange, Table};
use loft_types::models::{Conversation, Message, Notification, NotificationKind};

use crate::config::RealtimeConfig;
use crate::conversations::ConversationList;
use crate::counts::{CountSource, count_or_zero};
use crate::effects::{self, DesktopPermission, Effect, EffectError, Presenter, Toast};
use crate::events::{AppEvent, EventBus, RealtimeEvent};
use crate::reconciler::{self, PlanContext};
use crate::sound::{AudioOutput, SoundDispatcher};
use crate::subscription::{RealtimeTransport, SubscriptionSpec, SubscriptionState, run_subscription};

/// Collaborators a session is built from.
pub struct SessionDeps {
    pub counts: Arc<dyn CountSource>,
    pub presenter: Arc<dyn Presenter>,
    pub audio: Arc<dyn AudioOutput>,
    pub transport: Arc<dyn RealtimeTransport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountsSnapshot {
    pub unread_messages_count: u32,
    pub unread_notifications_count: u32,
    pub is_online: bool,
}

#[derive(Default)]
struct SessionState {
    unread_messages: u32,
    unread_notifications: u32,
    is_online: bool,
    conversations: ConversationList,
}

struct Subscription {
    spec: SubscriptionSpec,
    tx: Mutex<Option<watch::Sender<SubscriptionState>>>,
    rx: watch::Receiver<SubscriptionState>,
}

struct SessionInner {
    user_id: Uuid,
    config: RealtimeConfig,
    counts: Arc<dyn CountSource>,
    presenter: Arc<dyn Presenter>,
    transport: Arc<dyn RealtimeTransport>,
    sound: SoundDispatcher,
    bus: EventBus,
    state: Mutex<SessionState>,
    permission: Mutex<DesktopPermission>,
    subscriptions: Vec<Subscription>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    live: AtomicBool,
    cancel: CancellationToken,
}

enum MessageFate {
    Applied(Option<String>),
    UnknownConversation,
    NotParticipant,
}

/// Unread state of one logged-in user. Built at login, shut down at logout.
///
/// Counters are advisory: realtime inserts bump them, the pull cycle
/// overwrites them with server values. Cloning is cheap and every clone
/// drives the same session.
#[derive(Clone)]
pub struct RealtimeSession {
    inner: Arc<SessionInner>,
}

impl RealtimeSession {
    pub fn new(user_id: Uuid, config: RealtimeConfig, deps: SessionDeps) -> Self {
        let subscriptions = [
            SubscriptionSpec {
                name: "user-notifications",
                table: Table::Notifications,
                filter: Some(ColumnFilter::eq("user_id", user_id)),
            },
            SubscriptionSpec {
                name: "messages",
                table: Table::Messages,
                filter: None,
            },
            SubscriptionSpec {
                name: "conversations",
                table: Table::Conversations,
                filter: None,
            },
        ]
        .into_iter()
        .map(|spec| {
            let (tx, rx) = watch::channel(SubscriptionState::Unsubscribed);
            Subscription {
                spec,
                tx: Mutex::new(Some(tx)),
                rx,
            }
        })
        .collect();

        let permission = deps.presenter.permission();
        Self {
            inner: Arc::new(SessionInner {
                user_id,
                config,
                counts: deps.counts,
                presenter: deps.presenter,
                transport: deps.transport,
                sound: SoundDispatcher::new(deps.audio),
                bus: EventBus::new(),
                state: Mutex::new(SessionState {
                    is_online: true,
                    ..Default::default()
                }),
                permission: Mutex::new(permission),
                subscriptions,
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                live: AtomicBool::new(true),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Ask for desktop permission if undecided, load the conversation list,
    /// then start the pull timer and the realtime subscriptions.
    /// Calling it again is a no-op.
    pub async fn start(&self) {
        if !self.is_live() || self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        self.settle_permission();
        self.refresh_conversations().await;

        let mut handles = vec![self.spawn_pull_loop()];
        for index in 0..self.inner.subscriptions.len() {
            if let Some(handle) = self.spawn_subscription(index) {
                handles.push(handle);
            }
        }
        lock(&self.inner.tasks).extend(handles);

        info!(user_id = %self.inner.user_id, "realtime session started");
    }

    /// Stop the timer and the subscriptions and discard all counters.
    /// Updates from requests still in flight are dropped. Idempotent.
    pub async fn shutdown(&self) {
        if !self.inner.live.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();
        *lock(&self.inner.state) = SessionState::default();

        let tasks: Vec<_> = lock(&self.inner.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("session task ended abnormally: {}", e);
            }
        }
        info!(user_id = %self.inner.user_id, "realtime session closed");
    }

    pub fn user_id(&self) -> Uuid {
        self.inner.user_id
    }

    pub fn unread_messages_count(&self) -> u32 {
        lock(&self.inner.state).unread_messages
    }

    pub fn unread_notifications_count(&self) -> u32 {
        lock(&self.inner.state).unread_notifications
    }

    pub fn is_online(&self) -> bool {
        lock(&self.inner.state).is_online
    }

    pub fn snapshot(&self) -> CountsSnapshot {
        let state = lock(&self.inner.state);
        CountsSnapshot {
            unread_messages_count: state.unread_messages,
            unread_notifications_count: state.unread_notifications,
            is_online: state.is_online,
        }
    }

    /// Conversations, most recently updated first.
    pub fn conversations(&self) -> Vec<Conversation> {
        lock(&self.inner.state).conversations.as_slice().to_vec()
    }

    pub fn subscription_states(&self) -> Vec<(&'static str, SubscriptionState)> {
        self.inner
            .subscriptions
            .iter()
            .map(|sub| (sub.spec.name, *sub.rx.borrow()))
            .collect()
    }

    /// True while every realtime subscription is established. When false,
    /// counters still converge through the pull cycle.
    pub fn realtime_healthy(&self) -> bool {
        self.inner
            .subscriptions
            .iter()
            .all(|sub| *sub.rx.borrow() == SubscriptionState::Subscribed)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AppEvent> {
        self.inner.bus.subscribe()
    }

    /// Overwrite both counters with server values. Each count that cannot
    /// be fetched becomes 0. Overlapping calls all run; the last to finish wins.
    pub async fn refresh_counts(&self) {
        let counts = &self.inner.counts;
        let (messages, notifications) = tokio::join!(
            count_or_zero("messages", counts.unread_messages()),
            count_or_zero("notifications", counts.unread_notifications()),
        );
        let applied = self.update(|state| {
            state.unread_messages = messages;
            state.unread_notifications = notifications;
        });
        if applied.is_some() {
            debug!(messages, notifications, "unread counts refreshed");
        }
    }

    /// One pull: both counters plus the per-conversation counts.
    pub async fn pull_cycle(&self) {
        tokio::join!(self.refresh_counts(), self.refresh_conversation_unread());
    }

    pub async fn refresh_conversations(&self) {
        match self.inner.counts.conversations().await {
            Ok(list) => {
                let len = list.len();
                if self.update(|state| state.conversations.replace(list)).is_some() {
                    debug!(conversations = len, "conversation list loaded");
                }
            }
            Err(e) => debug!("conversation list unavailable: {}", e),
        }
    }

    async fn refresh_conversation_unread(&self) {
        match self.inner.counts.unread_by_conversation().await {
            Ok(unread) => {
                self.update(|state| state.conversations.apply_unread(&unread));
            }
            Err(e) => debug!("per-conversation unread counts unavailable: {}", e),
        }
    }

    /// Zero the conversation's unread count now, then persist the read
    /// marker. A failed server call is not rolled back; the next pull
    /// brings the server's view back.
    pub async fn mark_conversation_as_read(&self, conversation_id: Uuid) {
        self.update(|state| {
            if let Some(previous) = state.conversations.mark_read(conversation_id) {
                state.unread_messages = state.unread_messages.saturating_sub(previous);
            }
        });

        if let Err(e) = self.inner.counts.mark_conversation_read(conversation_id).await {
            debug!(%conversation_id, "read marker not persisted: {}", e);
        }
    }

    /// Connectivity signal. Only the offline to online transition pulls.
    pub async fn set_online(&self, online: bool) {
        let Some(was_online) = self.update(|state| std::mem::replace(&mut state.is_online, online)) else {
            return;
        };
        match (was_online, online) {
            (false, true) => {
                info!("back online, refreshing unread counts");
                self.pull_cycle().await;
            }
            (true, false) => info!("offline"),
            _ => {}
        }
    }

    /// Window focus signal.
    pub async fn on_focus(&self) {
        self.pull_cycle().await;
    }

    /// Audio may only play after a user gesture; call this on the first one.
    pub fn notify_user_gesture(&self) {
        self.inner.sound.unlock();
    }

    /// Play the cue for `kind`. Silent before the first gesture; never fails.
    pub fn play_sound(&self, kind: NotificationKind) {
        if let Err(e) = self.inner.sound.play(kind) {
            debug!(kind = kind.as_str(), "sound cue failed: {}", e);
        }
    }

    /// Parse and apply a raw change from the channel.
    pub fn handle_change(&self, change: RawChange) -> Vec<EffectError> {
        match RealtimeEvent::from_change(change) {
            Ok(Some(event)) => self.handle_event(event),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("dropping change event: {}", e);
                Vec::new()
            }
        }
    }

    /// Apply a change event and run its effects. Returns the effects that
    /// failed; the counters are updated regardless.
    pub fn handle_event(&self, event: RealtimeEvent) -> Vec<EffectError> {
        match event {
            RealtimeEvent::NotificationInsert(n) => self.on_notification(n),
            RealtimeEvent::MessageInsert(m) => self.on_message(m),
            RealtimeEvent::ConversationUpdate(patch) => {
                if self.update(|state| state.conversations.apply_patch(&patch)) == Some(false) {
                    trace!(conversation_id = %patch.id, "update for a conversation not in the list");
                }
                Vec::new()
            }
        }
    }

    fn on_notification(&self, n: Notification) -> Vec<EffectError> {
        if n.user_id != self.inner.user_id {
            warn!(notification_id = %n.id, "notification addressed to another user, dropping");
            return Vec::new();
        }

        let Some(count) = self.update(|state| {
            state.unread_notifications = state.unread_notifications.saturating_add(1);
            state.unread_notifications
        }) else {
            return Vec::new();
        };

        trace!(notification_id = %n.id, kind = n.kind.as_str(), count, "notification received");
        let effects = reconciler::plan_notification(&n, count, &self.plan_context());
        self.run_effects(effects)
    }

    fn on_message(&self, m: Message) -> Vec<EffectError> {
        if m.sender_id == self.inner.user_id {
            trace!(message_id = %m.id, "own message");
            return Vec::new();
        }

        match self.admit_message(&m, true) {
            Some(MessageFate::Applied(name)) => self.announce_message(&m, name),
            Some(MessageFate::UnknownConversation) => {
                // Usually a conversation created after the list was loaded.
                debug!(conversation_id = %m.conversation_id, "message for an unknown conversation, reloading list");
                self.spawn_deferred_message(m);
                Vec::new()
            }
            Some(MessageFate::NotParticipant) => {
                warn!(conversation_id = %m.conversation_id, "message for a conversation the user is not in, dropping");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Check membership against the local list and count the message.
    /// `bump_conversation` is false when the list was fetched after the
    /// message was stored and already includes it.
    fn admit_message(&self, m: &Message, bump_conversation: bool) -> Option<MessageFate> {
        let user_id = self.inner.user_id;
        self.update(|state| {
            if !state.conversations.is_member(m.conversation_id, user_id) {
                return match state.conversations.get(m.conversation_id) {
                    Some(_) => MessageFate::NotParticipant,
                    None => MessageFate::UnknownConversation,
                };
            }
            let name = if bump_conversation {
                state.conversations.apply_message(m)
            } else {
                state.conversations.record_message(m)
            };
            match name {
                Some(name) => {
                    state.unread_messages = state.unread_messages.saturating_add(1);
                    MessageFate::Applied(name)
                }
                None => MessageFate::UnknownConversation,
            }
        })
    }

    fn announce_message(&self, m: &Message, name: Option<String>) -> Vec<EffectError> {
        let effects = reconciler::plan_message(m, name.as_deref(), &self.plan_context());
        self.run_effects(effects)
    }

    /// Reload the list, then deliver `m` if the user turns out to be a participant.
    fn spawn_deferred_message(&self, m: Message) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let session = self.clone();
        tokio::spawn(async move {
            session.refresh_conversations().await;
            match session.admit_message(&m, false) {
                Some(MessageFate::Applied(name)) => {
                    for e in session.announce_message(&m, name) {
                        debug!(message_id = %m.id, "message effect failed: {}", e);
                    }
                }
                Some(_) => {
                    debug!(conversation_id = %m.conversation_id, "message not for this user after reload, dropping");
                }
                None => {}
            }
        });
    }

    fn run_effects(&self, planned: Vec<Effect>) -> Vec<EffectError> {
        effects::execute(planned, self.inner.presenter.as_ref(), &self.inner.sound, &self.inner.bus)
    }

    fn plan_context(&self) -> PlanContext<'_> {
        PlanContext {
            config: &self.inner.config,
            permission: *lock(&self.inner.permission),
        }
    }

    fn settle_permission(&self) {
        let presenter = &self.inner.presenter;
        let mut permission = presenter.permission();
        if permission == DesktopPermission::Default {
            permission = presenter.request_permission();
            if permission == DesktopPermission::Granted {
                let toast = Toast {
                    kind: NotificationKind::Success,
                    title: "Notifications enabled".into(),
                    description: "You will receive desktop notifications".into(),
                    duration: self.inner.config.toast_duration,
                    action: None,
                };
                if let Err(e) = presenter.show_toast(&toast) {
                    debug!("toast failed: {}", e);
                }
            }
        }
        debug!(?permission, "desktop notification permission");
        *lock(&self.inner.permission) = permission;
    }

    fn spawn_pull_loop(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        let period = self.inner.config.refresh_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(session) = upgrade(&weak) else { break };
                tokio::spawn(async move { session.pull_cycle().await });
            }
            debug!("pull timer stopped");
        })
    }

    fn spawn_subscription(&self, index: usize) -> Option<JoinHandle<()>> {
        let sub = &self.inner.subscriptions[index];
        let state = lock(&sub.tx).take()?;
        let weak = Arc::downgrade(&self.inner);

        Some(tokio::spawn(run_subscription(
            sub.spec.clone(),
            self.inner.transport.clone(),
            self.inner.config.reconnect.clone(),
            self.inner.cancel.clone(),
            state,
            move |change| {
                if let Some(session) = upgrade(&weak) {
                    session.handle_change(change);
                }
            },
        )))
    }

    fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Mutate session state unless the session has been shut down.
    fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let mut state = lock(&self.inner.state);
        if !self.is_live() {
            trace!("session closed, dropping state update");
            return None;
        }
        Some(f(&mut state))
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn upgrade(weak: &Weak<SessionInner>) -> Option<RealtimeSession> {
    weak.upgrade().map(|inner| RealtimeSession { inner })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
