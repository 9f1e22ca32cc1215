//! Outbound pacing in front of the Telegram adapter.
//!
//! Relayed messages and user notices go to private chats, where Telegram tolerates
//! short bursts, so they only share the global budget. Group chats (the moderation
//! chat receiving chat logs) are limited to roughly 20 posts a minute and get their
//! own spacing on top.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Spacing between any two API calls.
    pub global_min_interval: Duration,
    /// Spacing between posts to the same group chat.
    pub group_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            group_min_interval: Duration::from_secs(3),
        }
    }
}

/// Hands out send slots at a fixed spacing.
#[derive(Debug)]
struct Pacer {
    interval: Duration,
    next: Instant,
}

impl Pacer {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next: now,
        }
    }

    /// Take the earliest free slot; returns how long to wait for it.
    fn reserve_at(&mut self, now: Instant) -> Duration {
        let slot = self.next.max(now);
        self.next = slot + self.interval;
        slot - now
    }

    /// No slot is pending, so this pacer is indistinguishable from a fresh one.
    fn is_idle_at(&self, now: Instant) -> bool {
        self.next <= now
    }
}

/// Group chat ids are negative in the Bot API.
fn is_group(chat: ChatId) -> bool {
    chat.0 < 0
}

/// [`MessagingPort`] decorator that paces calls to stay clear of 429s.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<Pacer>,
    /// Only groups with a pending slot are kept.
    groups: Mutex<HashMap<ChatId, Pacer>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(Pacer::new(cfg.global_min_interval, Instant::now())),
            groups: Mutex::new(HashMap::new()),
        }
    }

    async fn wait_turn(&self, chat: Option<ChatId>) {
        let now = Instant::now();
        let mut wait = self.global.lock().await.reserve_at(now);
        if let Some(chat) = chat.filter(|c| is_group(*c)) {
            wait = wait.max(self.reserve_group_at(chat, now).await);
        }
        if !wait.is_zero() {
            tracing::trace!(?chat, ?wait, "pacing outbound call");
            sleep(wait).await;
        }
    }

    async fn reserve_group_at(&self, chat: ChatId, now: Instant) -> Duration {
        let mut groups = self.groups.lock().await;
        groups.retain(|_, p| !p.is_idle_at(now));
        groups
            .entry(chat)
            .or_insert_with(|| Pacer::new(self.cfg.group_min_interval, now))
            .reserve_at(now)
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.wait_turn(Some(chat_id)).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.wait_turn(Some(chat_id)).await;
        self.inner
            .send_inline_keyboard(chat_id, text, keyboard)
            .await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.wait_turn(None).await;
        self.inner.answer_callback_query(callback_id, text).await
    }
}
