use std::{sync::Arc, time::Instant};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::Mutex;

use pairchat_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use pairchat_core::{
    audit::AuditLogger, config::Config, domain::ChatId, engine::PairingEngine,
    messaging::port::MessagingPort, notify::Notifier, security::RelayLimiter,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub engine: PairingEngine,
    pub notifier: Notifier,
    pub messenger: Arc<dyn MessagingPort>,
    pub rate_limiter: Arc<Mutex<RelayLimiter>>,
    pub audit: Arc<AuditLogger>,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, engine: PairingEngine, messenger: Arc<dyn MessagingPort>) -> Self {
        let notifier = Notifier::new(
            messenger.clone(),
            cfg.moderation_chat_id.map(ChatId),
            cfg.telegram_safe_limit,
        );
        Self {
            notifier,
            messenger,
            engine,
            rate_limiter: Arc::new(Mutex::new(RelayLimiter::new(
                cfg.rate_limit_enabled,
                cfg.rate_limit_requests,
                cfg.rate_limit_window,
            ))),
            audit: Arc::new(AuditLogger::new(
                cfg.audit_log_path.clone(),
                cfg.audit_log_json,
            )),
            cfg,
        }
    }
}

pub async fn run_polling(cfg: Arc<Config>, engine: PairingEngine) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Basic startup info.
    match bot.get_me().await {
        Ok(me) => tracing::info!(bot = %me.username(), "pairchat started"),
        Err(e) => tracing::warn!("get_me failed, continuing: {e}"),
    }
    tracing::info!(
        admins = cfg.admin_ids.len(),
        moderation_chat = ?cfg.moderation_chat_id,
        store = %cfg.session_store_file.display(),
        "configuration loaded"
    );

    // Wrap the raw Telegram messenger with a throttling decorator to reduce 429s when chat
    // logs are posted. We still keep a 429 RetryAfter retry at the Telegram adapter layer.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let state = Arc::new(AppState::new(cfg.clone(), engine, messenger));

    // Forget idle flood-control buckets once per window.
    if cfg.rate_limit_enabled {
        let limiter = state.rate_limiter.clone();
        let window = cfg.rate_limit_window;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(window);
            loop {
                tick.tick().await;
                limiter.lock().await.prune_at(Instant::now());
            }
        });
    }

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    tracing::info!("dispatcher stopped");
    Ok(())
}
