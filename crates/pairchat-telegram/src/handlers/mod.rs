//! Telegram update handlers.
//!
//! Handlers check admin rights and flood control where relevant, turn the update
//! into an engine command and let the notifier deliver the resulting events.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use pairchat_core::{
    audit::{AuditEvent, AuditLogger},
    domain::UserId,
    errors::Error,
    events::{Inbound, Outbound},
    formatting::escape_html,
};

use crate::router::AppState;
mod callback;
mod commands;
mod text;

const NOT_TEXT: &str =
    "Only text messages can be relayed. Photos, stickers, voice and files are not supported.";

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if msg.from().is_none() {
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }
    }

    // The moderation group and any other group chats are not relayed.
    if !msg.chat.is_private() {
        return Ok(());
    }

    if msg.text().is_some() {
        return text::handle_text(bot, msg, state).await;
    }

    if let Some(user) = sender_id(&msg) {
        reply(&bot, user, NOT_TEXT).await;
    }
    Ok(())
}

pub(crate) fn sender_id(msg: &Message) -> Option<UserId> {
    msg.from().map(|u| UserId(u.id.0 as i64))
}

/// Run `cmd` and deliver its events; on failure tell `user` what went wrong.
///
/// Returns the delivered events, or `None` if the command failed.
pub(crate) async fn run_command(
    bot: &Bot,
    state: &AppState,
    user: UserId,
    cmd: Inbound,
) -> Option<Vec<Outbound>> {
    let context = command_name(&cmd);
    match state.notifier.execute(&state.engine, cmd).await {
        Ok(events) => {
            audit_events(&state.audit, &events);
            Some(events)
        }
        Err(e) => {
            if e.is_user_error() {
                tracing::debug!(%user, context, "rejected: {e}");
            } else {
                tracing::error!(%user, context, "command failed: {e}");
                state
                    .audit
                    .record(AuditEvent::error(user, &e.to_string(), Some(context)));
            }
            reply(bot, user, user_error_text(&e)).await;
            None
        }
    }
}

pub(crate) async fn reply(bot: &Bot, user: UserId, text: &str) {
    let chat = teloxide::types::ChatId(user.0);
    if let Err(e) = bot.send_message(chat, text.to_string()).await {
        tracing::warn!(%user, "reply failed: {e}");
    }
}

pub(crate) async fn reply_html(bot: &Bot, chat: teloxide::types::ChatId, html: &str) {
    if let Err(e) = bot
        .send_message(chat, html.to_string())
        .parse_mode(teloxide::types::ParseMode::Html)
        .await
    {
        tracing::warn!(chat = chat.0, "reply failed: {e}");
    }
}

/// What the user sees when a command is refused.
pub(crate) fn user_error_text(e: &Error) -> &'static str {
    match e {
        Error::NotPaired(_) => "You are not in a chat. Send /search to find a partner.",
        Error::InvalidState { .. } => {
            "You are already in a chat. Send /stop to leave it or /next for a new partner."
        }
        Error::UnknownUser(_) => "Unknown user: they have never used this bot.",
        Error::Blocked(_) => "🚫 Your account is restricted. You can't start new chats.",
        _ => "⚠️ Something went wrong on our side. Please try again in a moment.",
    }
}

fn command_name(cmd: &Inbound) -> &'static str {
    match cmd {
        Inbound::Search(_) => "search",
        Inbound::Cancel(_) => "cancel",
        Inbound::Message { .. } => "relay",
        Inbound::Disconnect { .. } => "disconnect",
        Inbound::Next(_) => "next",
        Inbound::TogglePremium { .. } => "premium",
        Inbound::SetBlocked { .. } => "block",
    }
}

pub(crate) fn audit_events(audit: &AuditLogger, events: &[Outbound]) {
    let mut seen_match = false;
    for ev in events {
        match ev {
            // A match comes as a mirrored pair of events; record it once.
            Outbound::Matched { user, partner } if !seen_match => {
                seen_match = true;
                audit.record(AuditEvent::matched(*user, *partner));
            }
            Outbound::ChatLogReady(log) => audit.record(AuditEvent::chat_ended(
                log.from,
                log.to,
                log.reason,
                log.transcript.len(),
            )),
            Outbound::SearchFailed { user, error } => {
                audit.record(AuditEvent::error(*user, error, Some("next")))
            }
            _ => {}
        }
    }
}

pub(crate) fn user_label(id: UserId) -> String {
    format!("<code>{}</code>", escape_html(&id.to_string()))
}
