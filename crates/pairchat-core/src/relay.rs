use std::sync::Arc;

use crate::{
    domain::UserId,
    errors::Error,
    session::TranscriptEntry,
    store::SessionStore,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayResult {
    /// Who the caller must forward the literal message to.
    pub target: UserId,
    pub entry: TranscriptEntry,
}

/// Routes a paired user's text to their partner and logs it on both sides.
#[derive(Clone)]
pub struct Relay {
    store: Arc<SessionStore>,
}

impl Relay {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    pub async fn relay(&self, sender: UserId, text: &str) -> Result<RelayResult> {
        let Some(mut pair) = self.store.lock_partnered(sender).await? else {
            return Err(Error::NotPaired(sender));
        };

        let entry = TranscriptEntry::new(sender, text);
        let target = pair.that().user_id();
        let (this, that) = pair.both_mut();
        this.append_transcript(entry.clone());
        that.append_transcript(entry.clone());

        tracing::debug!(%sender, %target, len = text.len(), "message relayed");
        Ok(RelayResult { target, entry })
    }
}
