use std::sync::Arc;

use teloxide::prelude::*;

use pairchat_core::{audit::AuditEvent, events::Inbound, security::RateDecision};

use crate::router::AppState;

use super::{reply, run_command, sender_id};

pub async fn handle_text(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = sender_id(&msg) else {
        return Ok(());
    };
    let Some(text) = msg.text().map(|s| s.to_string()) else {
        return Ok(());
    };

    if text.trim().is_empty() {
        return Ok(());
    }

    let decision = { state.rate_limiter.lock().await.check(user) };
    if let RateDecision::Limited { retry_after } = decision {
        let retry = retry_after.as_secs_f64();
        tracing::info!(%user, retry, "relay rate limited");
        state.audit.record(AuditEvent::rate_limit(user, retry));
        reply(
            &bot,
            user,
            &format!(
                "⏳ You're sending messages too fast. Try again in {:.0}s.",
                retry.ceil().max(1.0)
            ),
        )
        .await;
        return Ok(());
    }

    run_command(&bot, &state, user, Inbound::Message { user, text }).await;
    Ok(())
}
