use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::TimeDelta;

use crate::{errors::Error, Result};

/// Typed configuration for the relay bot, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub admin_ids: Vec<i64>,
    pub moderation_chat_id: Option<i64>,

    // Persistence
    pub session_store_file: PathBuf,

    // Premium
    /// Default grant length. `None` grants without expiry (`PREMIUM_DURATION_DAYS=0`).
    pub premium_duration: Option<TimeDelta>,

    // Telegram limits
    pub telegram_safe_limit: usize,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_source(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process env in production).
    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let admin_ids = parse_csv_i64(get("ADMIN_IDS"));
        if admin_ids.is_empty() {
            tracing::warn!("ADMIN_IDS is empty, admin commands are disabled");
        }

        let moderation_chat_id = match get("MODERATION_CHAT_ID").and_then(non_empty) {
            Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| {
                Error::Config(format!("MODERATION_CHAT_ID is not a chat id: {raw}"))
            })?),
            None => None,
        };

        let session_store_file = PathBuf::from(
            get("SESSION_STORE_FILE").unwrap_or("/tmp/pairchat-sessions.json".to_string()),
        );

        let premium_days = parse_num::<i64>(get("PREMIUM_DURATION_DAYS")).unwrap_or(90);
        let premium_duration = match premium_days {
            d if d < 0 => {
                return Err(Error::Config(format!(
                    "PREMIUM_DURATION_DAYS must not be negative, got {d}"
                )))
            }
            0 => None,
            d => Some(TimeDelta::try_days(d).ok_or_else(|| {
                Error::Config(format!("PREMIUM_DURATION_DAYS out of range: {d}"))
            })?),
        };

        // Leave headroom for the chat-log header.
        let telegram_safe_limit = parse_num::<usize>(get("TELEGRAM_SAFE_LIMIT"))
            .unwrap_or(4000)
            .clamp(64, 4096);

        // Audit logging
        let audit_log_path = PathBuf::from(
            get("AUDIT_LOG_PATH").unwrap_or("/tmp/pairchat-audit.log".to_string()),
        );
        let audit_log_json = parse_bool(get("AUDIT_LOG_JSON")).unwrap_or(false);

        // Rate limiting
        let rate_limit_enabled = parse_bool(get("RATE_LIMIT_ENABLED")).unwrap_or(true);
        let rate_limit_requests = parse_num::<u32>(get("RATE_LIMIT_REQUESTS"))
            .unwrap_or(30)
            .max(1);
        let rate_limit_window =
            Duration::from_secs(parse_num::<u64>(get("RATE_LIMIT_WINDOW")).unwrap_or(60).max(1));

        Ok(Self {
            telegram_bot_token,
            admin_ids,
            moderation_chat_id,
            session_store_file,
            premium_duration,
            telegram_safe_limit,
            audit_log_path,
            audit_log_json,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let Some((key, val)) = parse_dotenv_line(raw) else {
            continue;
        };
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv_line(raw: &str) -> Option<(String, String)> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (k, v) = line.split_once('=')?;
    let key = k.trim();
    if key.is_empty() {
        return None;
    }

    let mut val = v.trim();
    // Strip optional surrounding quotes.
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        val = &val[1..val.len() - 1];
    }
    Some((key.to_string(), val.to_string()))
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_num<T: std::str::FromStr>(v: Option<String>) -> Option<T> {
    v.and_then(|s| s.trim().parse::<T>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
