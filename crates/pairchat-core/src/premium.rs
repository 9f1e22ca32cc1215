use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::{domain::UserId, session::UserSession, store::SessionStore, Result};

/// Grants and revokes premium. Never touches pairing state.
#[derive(Clone)]
pub struct PremiumGate {
    store: Arc<SessionStore>,
    /// Grant length when the caller gives no expiry; `None` grants for life.
    default_duration: Option<TimeDelta>,
}

impl PremiumGate {
    pub fn new(store: Arc<SessionStore>, default_duration: Option<TimeDelta>) -> Self {
        Self {
            store,
            default_duration,
        }
    }

    /// Flip the user's effective premium status and return the updated record.
    ///
    /// A lapsed grant counts as "not premium", so toggling it grants again.
    pub async fn toggle_premium(
        &self,
        user: UserId,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<UserSession> {
        let mut current = self.store.lock_existing(user).await?;
        let now = Utc::now();

        let mut next = current.clone();
        if current.is_premium_at(now) {
            next.set_premium(false, None);
        } else {
            let expiry = expiry.or_else(|| self.default_duration.map(|d| now + d));
            next.set_premium(true, expiry);
        }
        self.store.commit(&mut current, next).await?;

        tracing::info!(
            %user,
            premium = current.premium_flag(),
            expiry = ?current.premium_expiry(),
            "premium toggled"
        );
        Ok(current.clone())
    }
}
