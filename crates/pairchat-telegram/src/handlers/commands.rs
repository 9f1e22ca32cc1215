use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use teloxide::prelude::*;

use pairchat_core::{
    audit::AuditEvent,
    domain::UserId,
    events::{DisconnectReason, Inbound, Outbound},
    security::is_admin,
    session::SessionState,
};

use crate::router::AppState;

use super::{
    audit_events, reply, reply_html, run_command, sender_id, user_error_text, user_label,
};

const HELP: &str = "💬 <b>Anonymous Chat</b>\n\n\
Talk to a random stranger. Neither of you sees the other's name or profile.\n\n\
<b>📋 Commands:</b>\n\
/search - Find a partner\n\
/cancel - Stop searching\n\
/next - Leave the current chat and find a new partner\n\
/stop - Leave the current chat\n\
/status - Show your current state\n\
/help - Show this message\n\n\
<b>ℹ️ Note:</b> chats are reviewed by moderators after they end.";

const ADMIN_HELP: &str = "\n\n<b>🛡 Admin:</b>\n\
/premium &lt;user_id&gt; [days] - Toggle premium\n\
/block &lt;user_id&gt; - Block a user and end their chat\n\
/unblock &lt;user_id&gt; - Lift a block\n\
/stats - Session counters";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// `/block <user_id>` and `/unblock <user_id>`
fn parse_user_arg(arg: &str) -> Option<UserId> {
    let mut it = arg.split_whitespace();
    let user = it.next()?.parse::<i64>().ok().map(UserId)?;
    it.next().is_none().then_some(user)
}

/// `/premium <user_id> [days]`
fn parse_premium_args(arg: &str) -> Result<(UserId, Option<i64>), &'static str> {
    let mut it = arg.split_whitespace();
    let user = it
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .map(UserId)
        .ok_or("Usage: /premium <user_id> [days]")?;
    let days = match it.next() {
        Some(s) => match s.parse::<i64>() {
            Ok(d) if d > 0 => Some(d),
            _ => return Err("Days must be a positive number."),
        },
        None => None,
    };
    if it.next().is_some() {
        return Err("Usage: /premium <user_id> [days]");
    }
    Ok((user, days))
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = sender_id(&msg) else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let (cmd, arg) = parse_command(text);
    let admin = is_admin(Some(user), &state.cfg.admin_ids);

    // Pairing commands only make sense in a private chat with the bot.
    let pairing = matches!(
        cmd.as_str(),
        "search" | "cancel" | "stop" | "next" | "status"
    );
    if pairing && !msg.chat.is_private() {
        return Ok(());
    }

    match cmd.as_str() {
        "start" | "help" => {
            let body = if admin {
                format!("{HELP}{ADMIN_HELP}")
            } else {
                HELP.to_string()
            };
            reply_html(&bot, msg.chat.id, &body).await;
        }

        "search" => {
            run_command(&bot, &state, user, Inbound::Search(user)).await;
        }

        "cancel" => {
            let events = run_command(&bot, &state, user, Inbound::Cancel(user)).await;
            if events.is_some_and(|e| e.is_empty()) {
                reply(&bot, user, "You are not searching right now.").await;
            }
        }

        "stop" => {
            let cmd = Inbound::Disconnect {
                user,
                reason: DisconnectReason::Stop,
            };
            let events = run_command(&bot, &state, user, cmd).await;
            if events.is_some_and(|e| e.is_empty()) {
                reply(
                    &bot,
                    user,
                    user_error_text(&pairchat_core::Error::NotPaired(user)),
                )
                .await;
            }
        }

        "next" => {
            run_command(&bot, &state, user, Inbound::Next(user)).await;
        }

        "status" => match state.engine.store().get(user).await {
            Ok(s) => {
                let st = match s.state() {
                    SessionState::Idle => "💤 Not chatting. Send /search to find a partner.",
                    SessionState::Searching => "🔎 Searching for a partner...",
                    SessionState::Paired => "💬 In a chat.",
                };
                let st = if s.is_blocked() {
                    "🚫 Your account is restricted by a moderator."
                } else {
                    st
                };
                let premium = match (s.is_premium(), s.premium_expiry()) {
                    (true, Some(exp)) => {
                        format!("⭐ Premium until {}", exp.format("%Y-%m-%d"))
                    }
                    (true, None) => "⭐ Premium".to_string(),
                    (false, _) => "Standard account".to_string(),
                };
                reply_html(
                    &bot,
                    msg.chat.id,
                    &format!("📊 <b>Status</b>\n\n{st}\n{premium}"),
                )
                .await;
            }
            Err(e) => {
                tracing::error!(%user, "status lookup failed: {e}");
                reply(&bot, user, user_error_text(&e)).await;
            }
        },

        "premium" => {
            if !admin {
                reply_html(&bot, msg.chat.id, "⛔ Admins only.").await;
                return Ok(());
            }
            let (target, days) = match parse_premium_args(&arg) {
                Ok(v) => v,
                Err(usage) => {
                    reply_html(
                        &bot,
                        msg.chat.id,
                        &pairchat_core::formatting::escape_html(usage),
                    )
                    .await;
                    return Ok(());
                }
            };
            let expiry = days.and_then(|d| TimeDelta::try_days(d).map(|d| Utc::now() + d));
            toggle_premium(&bot, &state, msg.chat.id, user, target, expiry).await;
        }

        "block" | "unblock" => {
            if !admin {
                reply_html(&bot, msg.chat.id, "⛔ Admins only.").await;
                return Ok(());
            }
            let Some(target) = parse_user_arg(&arg) else {
                let usage = format!("Usage: /{cmd} &lt;user_id&gt;");
                reply_html(&bot, msg.chat.id, &usage).await;
                return Ok(());
            };
            set_blocked(&bot, &state, msg.chat.id, user, target, cmd == "block").await;
        }

        "stats" => {
            if !admin {
                reply_html(&bot, msg.chat.id, "⛔ Admins only.").await;
                return Ok(());
            }
            let stats = state.engine.stats().await;
            let waiting = state.engine.store().waiting().await.len();
            let body = format!(
                "📈 <b>Stats</b>\n\n\
                 Known users: {}\n\
                 Searching: {} (queue: {waiting})\n\
                 In chats: {} ({} pairs)\n\
                 Premium: {}\n\
                 Blocked: {}",
                stats.known_users,
                stats.searching,
                stats.paired_users,
                stats.paired_users / 2,
                stats.premium_users,
                stats.blocked_users,
            );
            reply_html(&bot, msg.chat.id, &body).await;
        }

        _ => {
            if msg.chat.is_private() {
                reply(&bot, user, "Unknown command. Send /help for the list.").await;
            }
        }
    }

    Ok(())
}

/// Shared by `/premium` and the moderation buttons. Returns the confirmation text.
pub(crate) async fn toggle_premium(
    bot: &Bot,
    state: &AppState,
    reply_to: teloxide::types::ChatId,
    admin: UserId,
    target: UserId,
    expiry: Option<chrono::DateTime<Utc>>,
) -> Option<String> {
    let cmd = Inbound::TogglePremium {
        user: target,
        expiry,
    };
    let events = match state.notifier.execute(&state.engine, cmd).await {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(%admin, %target, "premium toggle failed: {e}");
            reply_html(bot, reply_to, user_error_text(&e)).await;
            return None;
        }
    };

    let (premium, expiry) = events.iter().find_map(|e| match e {
        Outbound::PremiumChanged {
            premium, expiry, ..
        } => Some((*premium, *expiry)),
        _ => None,
    })?;
    state
        .audit
        .record(AuditEvent::premium(admin, target, premium, expiry));

    let text = match (premium, expiry) {
        (true, Some(exp)) => format!(
            "⭐ Premium granted to {} until {}.",
            user_label(target),
            exp.format("%Y-%m-%d %H:%M UTC")
        ),
        (true, None) => format!("⭐ Premium granted to {}.", user_label(target)),
        (false, _) => format!("Premium removed from {}.", user_label(target)),
    };
    reply_html(bot, reply_to, &text).await;
    Some(text)
}

/// Shared by `/block`, `/unblock` and the moderation buttons. Returns the confirmation text.
pub(crate) async fn set_blocked(
    bot: &Bot,
    state: &AppState,
    reply_to: teloxide::types::ChatId,
    admin: UserId,
    target: UserId,
    blocked: bool,
) -> Option<String> {
    let cmd = Inbound::SetBlocked {
        user: target,
        blocked,
    };
    let events = match state.notifier.execute(&state.engine, cmd).await {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(%admin, %target, blocked, "block change failed: {e}");
            reply_html(bot, reply_to, user_error_text(&e)).await;
            return None;
        }
    };
    audit_events(&state.audit, &events);

    let changed = events
        .iter()
        .any(|e| matches!(e, Outbound::BlockChanged { .. }));
    if changed {
        state
            .audit
            .record(AuditEvent::block(admin, target, blocked));
    }

    let text = block_reply(target, blocked, changed);
    reply_html(bot, reply_to, &text).await;
    Some(text)
}

fn block_reply(target: UserId, blocked: bool, changed: bool) -> String {
    let who = user_label(target);
    match (blocked, changed) {
        (true, true) => format!("🚫 {who} is blocked."),
        (true, false) => format!("ℹ️ {who} was already blocked."),
        (false, true) => format!("✅ {who} is unblocked."),
        (false, false) => format!("ℹ️ {who} was not blocked."),
    }
}
