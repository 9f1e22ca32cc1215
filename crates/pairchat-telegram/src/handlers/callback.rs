use std::sync::Arc;

use teloxide::prelude::*;

use pairchat_core::{
    domain::UserId,
    messaging::{
        port::MessagingPort,
        types::{parse_moderation_callback, ModerationAction},
    },
    security::is_admin,
};

use crate::router::AppState;

use super::commands::{set_blocked, toggle_premium};

/// Moderation buttons under a forwarded chat log: `premium:<id>` and `block:<id>`.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let admin = UserId(q.from.id.0 as i64);
    let chat_id = q.message.as_ref().map(|m| m.chat.id);
    let data = q.data.clone().unwrap_or_default();

    // Always answer callback query eventually.
    let (Some(chat_id), Some(action)) = (chat_id, parse_moderation_callback(&data)) else {
        answer(state.messenger.as_ref(), &cb_id, None).await;
        return Ok(());
    };

    if !is_admin(Some(admin), &state.cfg.admin_ids) {
        tracing::warn!(%admin, ?action, "non-admin pressed a moderation button");
        answer(state.messenger.as_ref(), &cb_id, Some("Admins only")).await;
        return Ok(());
    }

    let text = match action {
        ModerationAction::TogglePremium(target) => {
            match toggle_premium(&bot, &state, chat_id, admin, target, None).await {
                Some(_) => format!("Premium toggled for {target}"),
                None => "Premium toggle failed".to_string(),
            }
        }
        ModerationAction::Block(target) => {
            match set_blocked(&bot, &state, chat_id, admin, target, true).await {
                Some(_) => format!("{target} blocked"),
                None => "Block failed".to_string(),
            }
        }
    };
    answer(state.messenger.as_ref(), &cb_id, Some(&text)).await;
    Ok(())
}

/// Returns false when Telegram refused the answer; the failure is logged.
async fn answer(messenger: &dyn MessagingPort, cb_id: &str, text: Option<&str>) -> bool {
    match messenger.answer_callback_query(cb_id, text).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(callback = cb_id, "callback answer failed: {e}");
            false
        }
    }
}
