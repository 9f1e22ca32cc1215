//! Delivery of engine events through a [`MessagingPort`].

use std::sync::Arc;

use crate::{
    domain::{ChatId, UserId},
    engine::PairingEngine,
    events::{ChatLog, DisconnectReason, Inbound, Outbound},
    formatting::{escape_html, format_chat_log},
    messaging::{port::MessagingPort, types::InlineKeyboard},
    Result,
};

pub const WAITING: &str = "🔎 Looking for a partner... You'll be connected as soon as someone is available. Send /cancel to stop searching.";
pub const SEARCH_CANCELLED: &str = "Search cancelled. Send /search whenever you're ready.";
pub const MATCHED: &str = "✅ Partner found! Say hi.\n\nYour messages are relayed anonymously. Send /next for a new partner or /stop to leave.";
pub const PARTNER_LEFT: &str = "👋 Your partner left the chat. Send /search to find a new one.";
pub const CHAT_ENDED: &str = "You left the chat. Send /search to find a new partner.";
pub const DELIVERY_FAILED: &str = "⚠️ Your message could not be delivered, so the chat has ended. Send /search to find a new partner.";
pub const SEARCH_FAILED: &str = "⚠️ We couldn't start a new search right now. Send /search to try again.";
pub const BLOCKED: &str = "⚠️ Your account has been restricted by a moderator.";
pub const UNBLOCKED: &str = "✅ Your account restrictions have been lifted by a moderator.";

/// Renders [`Outbound`] events for users and the moderation chat.
#[derive(Clone)]
pub struct Notifier {
    messenger: Arc<dyn MessagingPort>,
    moderation_chat: Option<ChatId>,
    chunk_limit: usize,
}

impl Notifier {
    /// `chunk_limit` is capped at what the messenger can carry in one message.
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        moderation_chat: Option<ChatId>,
        chunk_limit: usize,
    ) -> Self {
        let chunk_limit = chunk_limit.min(messenger.capabilities().max_message_len);
        Self {
            messenger,
            moderation_chat,
            chunk_limit,
        }
    }

    /// Run `cmd` through the engine and deliver the resulting events in order.
    ///
    /// If a relayed message cannot be delivered the chat is closed with
    /// [`DisconnectReason::DeliveryFailed`] and the sender is told. Other delivery
    /// failures are logged and skipped. Returns every event produced.
    pub async fn execute(&self, engine: &PairingEngine, cmd: Inbound) -> Result<Vec<Outbound>> {
        let sender = match &cmd {
            Inbound::Message { user, .. } => Some(*user),
            _ => None,
        };

        let mut events = engine.handle(cmd).await?;
        let mut failed_relay = None;
        for ev in &events {
            match (ev, sender) {
                (Outbound::RelayMessage { target, .. }, Some(from)) => {
                    if let Err(e) = self.deliver(ev).await {
                        tracing::warn!(%from, %target, "relay delivery failed: {e}");
                        failed_relay = Some(from);
                    }
                }
                _ => self.deliver_logged(ev).await,
            }
        }

        if let Some(from) = failed_relay {
            let closed = engine
                .handle(Inbound::Disconnect {
                    user: from,
                    reason: DisconnectReason::DeliveryFailed,
                })
                .await?;
            for ev in &closed {
                match ev {
                    Outbound::ChatEnded { user } => {
                        self.notice_logged(*user, DELIVERY_FAILED).await
                    }
                    _ => self.deliver_logged(ev).await,
                }
            }
            events.extend(closed);
        }

        Ok(events)
    }

    pub async fn deliver(&self, ev: &Outbound) -> Result<()> {
        match ev {
            Outbound::Waiting { user } => self.notice(*user, WAITING).await,
            Outbound::SearchCancelled { user } => self.notice(*user, SEARCH_CANCELLED).await,
            Outbound::Matched { user, .. } => self.notice(*user, MATCHED).await,
            Outbound::RelayMessage { target, text } => self.notice(*target, text).await,
            Outbound::ChatLogReady(log) => self.forward_chat_log(log).await,
            Outbound::PartnerLeft { user } => self.notice(*user, PARTNER_LEFT).await,
            Outbound::ChatEnded { user } => self.notice(*user, CHAT_ENDED).await,
            Outbound::PremiumChanged {
                user,
                premium,
                expiry,
            } => {
                let text = match (premium, expiry) {
                    (true, Some(exp)) => format!(
                        "⭐ Premium is active until {}.",
                        exp.format("%Y-%m-%d %H:%M UTC")
                    ),
                    (true, None) => "⭐ Premium is active.".to_string(),
                    (false, _) => "Premium is no longer active on your account.".to_string(),
                };
                self.notice(*user, &text).await
            }
            Outbound::SearchFailed { user, .. } => self.notice(*user, SEARCH_FAILED).await,
            Outbound::BlockChanged { user, blocked } => {
                self.notice(*user, if *blocked { BLOCKED } else { UNBLOCKED })
                    .await
            }
        }
    }

    async fn deliver_logged(&self, ev: &Outbound) {
        if let Err(e) = self.deliver(ev).await {
            tracing::warn!(event = ?ev, "event delivery failed: {e}");
        }
    }

    async fn notice(&self, user: UserId, text: &str) -> Result<()> {
        self.messenger
            .send_html(ChatId::from(user), &escape_html(text))
            .await?;
        Ok(())
    }

    async fn notice_logged(&self, user: UserId, text: &str) {
        if let Err(e) = self.notice(user, text).await {
            tracing::warn!(%user, "notice delivery failed: {e}");
        }
    }

    /// Post a closed chat to moderation: header and chunks, moderation buttons on the footer.
    async fn forward_chat_log(&self, log: &ChatLog) -> Result<()> {
        let Some(chat) = self.moderation_chat else {
            tracing::info!(
                from = %log.from,
                to = %log.to,
                messages = log.transcript.len(),
                "no moderation chat configured, chat log dropped"
            );
            return Ok(());
        };

        let mut parts = format_chat_log(log, self.chunk_limit);
        let footer = parts.pop().unwrap_or_default();
        for part in &parts {
            self.messenger.send_html(chat, part).await?;
        }
        self.messenger
            .send_inline_keyboard(
                chat,
                &footer,
                InlineKeyboard::moderation(&[log.from, log.to]),
            )
            .await?;

        tracing::info!(
            from = %log.from,
            to = %log.to,
            messages = log.transcript.len(),
            "chat log forwarded to moderation"
        );
        Ok(())
    }
}
