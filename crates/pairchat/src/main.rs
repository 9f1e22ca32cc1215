use std::sync::Arc;

use pairchat_core::{
    config::Config,
    engine::PairingEngine,
    store::{JsonFileBackend, SessionStore},
};

#[tokio::main]
async fn main() -> Result<(), pairchat_core::Error> {
    pairchat_core::logging::init("pairchat")?;

    let cfg = Arc::new(Config::load()?);

    tracing::info!(path = %cfg.session_store_file.display(), "opening session store");
    let backend = Arc::new(JsonFileBackend::open(cfg.session_store_file.clone()).await?);
    let store = Arc::new(SessionStore::new(backend));
    let engine = PairingEngine::new(store, cfg.premium_duration);

    pairchat_telegram::router::run_polling(cfg, engine)
        .await
        .map_err(|e| pairchat_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
