//! Append-only audit trail of pairing and admin activity.
//!
//! Message text is never written here; transcripts only go to the moderation chat.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{domain::UserId, errors::Error, events::DisconnectReason, Result};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium_expiry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
}

impl AuditEvent {
    fn base(event: &str, user: UserId) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            user_id: Some(user.0),
            ..Self::default()
        }
    }

    pub fn matched(user: UserId, partner: UserId) -> Self {
        Self {
            partner_id: Some(partner.0),
            ..Self::base("matched", user)
        }
    }

    pub fn chat_ended(
        user: UserId,
        partner: UserId,
        reason: DisconnectReason,
        messages: usize,
    ) -> Self {
        Self {
            partner_id: Some(partner.0),
            reason: Some(reason.to_string()),
            messages: Some(messages),
            ..Self::base("chat_ended", user)
        }
    }

    pub fn premium(
        admin: UserId,
        user: UserId,
        premium: bool,
        expiry: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            premium: Some(premium),
            premium_expiry: expiry.map(|e| e.to_rfc3339()),
            admin_id: Some(admin.0),
            ..Self::base("premium", user)
        }
    }

    pub fn block(admin: UserId, user: UserId, blocked: bool) -> Self {
        Self {
            blocked: Some(blocked),
            admin_id: Some(admin.0),
            ..Self::base("block", user)
        }
    }

    pub fn rate_limit(user: UserId, retry_after: f64) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::base("rate_limit", user)
        }
    }

    pub fn error(user: UserId, error: &str, context: Option<&str>) -> Self {
        Self {
            error: Some(error.to_string()),
            context: context.map(|s| s.to_string()),
            ..Self::base("error", user)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.context {
            event.context = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Like [`AuditLogger::write`] but only logs failures; audit must never break a reply.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(path = %self.path.display(), "audit write failed: {e}");
        }
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.log"))
    }

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(AUDIT_MAX_TEXT + 10);
        let t = truncate_text(&s, AUDIT_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert_eq!(t.len(), AUDIT_MAX_TEXT + 3);
    }

    #[test]
    fn json_lines_skip_empty_fields() {
        let log = AuditLogger::new(tmp_file("pairchat-audit-json"), true);
        log.write(AuditEvent::matched(UserId(1), UserId(2))).unwrap();
        log.write(AuditEvent::chat_ended(
            UserId(2),
            UserId(1),
            DisconnectReason::Next,
            4,
        ))
        .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "matched");
        assert_eq!(lines[0]["partner_id"], 2);
        assert!(lines[0].get("reason").is_none());
        assert_eq!(lines[1]["reason"], "user moved to next partner");
        assert_eq!(lines[1]["messages"], 4);

        let _ = std::fs::remove_file(log.path());
    }

    #[test]
    fn block_records_admin_and_state() {
        let log = AuditLogger::new(tmp_file("pairchat-audit-block"), true);
        log.write(AuditEvent::block(UserId(100), UserId(5), true))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let line: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(line["event"], "block");
        assert_eq!(line["user_id"], 5);
        assert_eq!(line["admin_id"], 100);
        assert_eq!(line["blocked"], true);
        assert!(line.get("premium").is_none());

        let _ = std::fs::remove_file(log.path());
    }

    #[test]
    fn plain_format_truncates_errors() {
        let log = AuditLogger::new(tmp_file("pairchat-audit-plain"), false);
        let long = "x".repeat(AUDIT_MAX_TEXT + 1);
        log.write(AuditEvent::error(UserId(9), &long, Some("relay")))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("event: error"));
        assert!(written.contains("user_id: 9"));
        assert!(written.contains("context: relay"));
        assert!(written.contains("..."));

        let _ = std::fs::remove_file(log.path());
    }
}
