use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::UserId;

/// Where a user is in the pairing lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Searching,
    Paired,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Searching => "searching",
            SessionState::Paired => "paired",
        };
        f.write_str(s)
    }
}

/// One relayed message as kept in the pair's transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub sender: UserId,
    pub at: DateTime<Utc>,
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(sender: UserId, text: impl Into<String>) -> Self {
        Self {
            sender,
            at: Utc::now(),
            text: text.into(),
        }
    }
}

/// Per-user record owned by [`crate::store::SessionStore`].
///
/// Fields are private: the pairing invariants (partner present iff paired, symmetric
/// partners, expiry only with premium) are kept by the store, which is the only place
/// the mutators are reachable from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserSession {
    user_id: UserId,
    state: SessionState,
    partner_id: Option<UserId>,
    transcript: Vec<TranscriptEntry>,
    premium: bool,
    premium_expiry: Option<DateTime<Utc>>,
    blocked: bool,
}

impl UserSession {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            state: SessionState::Idle,
            partner_id: None,
            transcript: Vec::new(),
            premium: false,
            premium_expiry: None,
            blocked: false,
        }
    }

    /// Rebuild a record from storage.
    ///
    /// The waiting queue and transcripts only live in memory, so a restored user
    /// always starts Idle; premium and blocks survive.
    pub fn restore(stored: StoredSession) -> Self {
        let mut s = Self::new(stored.user_id);
        s.set_premium(stored.premium, stored.premium_expiry);
        s.blocked = stored.blocked;
        s
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn partner_id(&self) -> Option<UserId> {
        self.partner_id
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Raw stored flag. Use [`UserSession::is_premium`] for access decisions.
    pub fn premium_flag(&self) -> bool {
        self.premium
    }

    pub fn premium_expiry(&self) -> Option<DateTime<Utc>> {
        self.premium_expiry
    }

    pub fn is_premium(&self) -> bool {
        self.is_premium_at(Utc::now())
    }

    /// Lazy expiry: an expired grant reads as non-premium without anyone clearing it.
    pub fn is_premium_at(&self, now: DateTime<Utc>) -> bool {
        self.premium && self.premium_expiry.map_or(true, |exp| now < exp)
    }

    /// Blocked users cannot search; a moderator lifts it with `/unblock`.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub(crate) fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
        if state != SessionState::Paired {
            self.partner_id = None;
        }
    }

    pub(crate) fn set_partner(&mut self, partner: UserId) {
        self.state = SessionState::Paired;
        self.partner_id = Some(partner);
    }

    pub(crate) fn append_transcript(&mut self, entry: TranscriptEntry) {
        self.transcript.push(entry);
    }

    pub(crate) fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    pub(crate) fn set_premium(&mut self, premium: bool, expiry: Option<DateTime<Utc>>) {
        self.premium = premium;
        self.premium_expiry = if premium { expiry } else { None };
    }

    /// Back to Idle: partner and transcript dropped.
    pub(crate) fn reset(&mut self) {
        self.set_state(SessionState::Idle);
        self.clear_transcript();
    }
}

/// Persisted projection of a [`UserSession`] (everything except the transcript).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub user_id: UserId,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<UserId>,
    #[serde(default)]
    pub premium: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub blocked: bool,
}

impl From<&UserSession> for StoredSession {
    fn from(s: &UserSession) -> Self {
        Self {
            user_id: s.user_id,
            state: s.state,
            partner_id: s.partner_id,
            premium: s.premium,
            premium_expiry: s.premium_expiry,
            blocked: s.blocked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn new_session_is_idle_and_plain() {
        let s = UserSession::new(UserId(7));
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.partner_id(), None);
        assert!(s.transcript().is_empty());
        assert!(!s.is_premium());
    }

    #[test]
    fn partner_cleared_when_leaving_paired() {
        let mut s = UserSession::new(UserId(1));
        s.set_partner(UserId(2));
        assert_eq!(s.state(), SessionState::Paired);
        s.set_state(SessionState::Searching);
        assert_eq!(s.partner_id(), None);
    }

    #[test]
    fn expiry_dropped_when_premium_revoked() {
        let mut s = UserSession::new(UserId(1));
        s.set_premium(true, Some(Utc::now() + TimeDelta::days(1)));
        assert!(s.is_premium());
        s.set_premium(false, Some(Utc::now() + TimeDelta::days(1)));
        assert_eq!(s.premium_expiry(), None);
    }

    #[test]
    fn premium_lapses_at_expiry() {
        let now = Utc::now();
        let mut s = UserSession::new(UserId(1));
        s.set_premium(true, Some(now));
        assert!(s.premium_flag());
        assert!(s.is_premium_at(now - TimeDelta::seconds(1)));
        assert!(!s.is_premium_at(now));

        s.set_premium(true, None);
        assert!(s.is_premium_at(now + TimeDelta::days(10_000)));
    }

    #[test]
    fn restore_keeps_premium_and_drops_pairing() {
        let expiry = Utc::now() + TimeDelta::days(3);
        let stored = StoredSession {
            user_id: UserId(5),
            state: SessionState::Paired,
            partner_id: Some(UserId(6)),
            premium: true,
            premium_expiry: Some(expiry),
            blocked: true,
        };
        let s = UserSession::restore(stored);
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.partner_id(), None);
        assert!(s.premium_flag());
        assert_eq!(s.premium_expiry(), Some(expiry));
        assert!(s.is_blocked());
    }

    #[test]
    fn records_written_before_blocking_existed_load_unblocked() {
        let stored: StoredSession =
            serde_json::from_str(r#"{"user_id": 3, "state": "idle", "premium": true}"#).unwrap();
        assert!(!stored.blocked);
        assert!(!UserSession::restore(stored).is_blocked());
    }

    #[test]
    fn stored_session_json_shape() {
        let mut s = UserSession::new(UserId(42));
        s.set_state(SessionState::Searching);
        let json = serde_json::to_value(StoredSession::from(&s)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "user_id": 42,
                "state": "searching",
                "premium": false,
                "blocked": false
            })
        );
    }
}
