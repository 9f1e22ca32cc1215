use std::sync::Arc;

use crate::{
    domain::UserId,
    errors::Error,
    session::SessionState,
    store::SessionStore,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    /// No one was waiting; the user is now at the tail of the queue.
    Queued,
    /// The user was already searching; nothing changed.
    AlreadySearching,
    Matched { partner: UserId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotSearching,
}

/// FIFO matchmaking over the store's waiting queue.
#[derive(Clone)]
pub struct Matchmaker {
    store: Arc<SessionStore>,
}

impl Matchmaker {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    pub async fn request_search(&self, user: UserId) -> Result<SearchOutcome> {
        let mut queue = self.store.queue().await;

        {
            let current = self.store.lock_user(user).await?;
            if current.is_blocked() {
                return Err(Error::Blocked(user));
            }
            match current.state() {
                SessionState::Paired => {
                    return Err(Error::InvalidState {
                        user,
                        state: SessionState::Paired,
                        action: "search",
                    })
                }
                SessionState::Searching => return Ok(SearchOutcome::AlreadySearching),
                SessionState::Idle => {}
            }
        }

        // Idle users are never queued, so the head can't be `user`.
        while let Some(head) = queue.pop_front() {
            let mut pair = self.store.lock_pair(user, head).await?;
            if pair.that().state() != SessionState::Searching {
                tracing::warn!(
                    %user,
                    stale = %head,
                    state = %pair.that().state(),
                    "dropping stale queue entry"
                );
                continue;
            }

            let mut this = pair.this().clone();
            let mut that = pair.that().clone();
            this.set_partner(head);
            that.set_partner(user);

            if let Err(e) = self.store.commit_pair(&mut pair, this, that).await {
                queue.push_front(head);
                return Err(e);
            }

            tracing::info!(%user, partner = %head, waiting = queue.len(), "users paired");
            return Ok(SearchOutcome::Matched { partner: head });
        }

        let mut current = self.store.lock_user(user).await?;
        let mut next = current.clone();
        next.set_state(SessionState::Searching);
        self.store.commit(&mut current, next).await?;
        queue.push_back(user);

        tracing::info!(%user, position = queue.len(), "user waiting for partner");
        Ok(SearchOutcome::Queued)
    }

    pub async fn cancel_search(&self, user: UserId) -> Result<CancelOutcome> {
        let mut queue = self.store.queue().await;
        let mut current = self.store.lock_user(user).await?;
        if current.state() != SessionState::Searching {
            return Ok(CancelOutcome::NotSearching);
        }

        let mut next = current.clone();
        next.set_state(SessionState::Idle);
        self.store.commit(&mut current, next).await?;
        queue.remove(user);

        tracing::info!(%user, "search cancelled");
        Ok(CancelOutcome::Cancelled)
    }
}
