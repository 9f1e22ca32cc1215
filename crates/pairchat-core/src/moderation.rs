use std::sync::Arc;

use chrono::Utc;

use crate::{
    disconnect::Disconnected,
    domain::UserId,
    events::{ChatLog, DisconnectReason},
    session::SessionState,
    store::SessionStore,
    Result,
};

/// Result of a block or unblock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockOutcome {
    /// False when the user was already in the requested state.
    pub changed: bool,
    /// The chat a block tore down, if the user was in one.
    pub closed: Option<Disconnected>,
}

/// Moderator blocks. A blocked user is taken out of any chat or queue and cannot
/// search again until unblocked.
#[derive(Clone)]
pub struct Moderator {
    store: Arc<SessionStore>,
}

impl Moderator {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    pub async fn set_blocked(&self, user: UserId, blocked: bool) -> Result<BlockOutcome> {
        // Only known users can be moderated.
        self.store.find(user).await?;

        // Held throughout so nobody can pair with `user` while we decide.
        let mut queue = self.store.queue().await;

        if blocked {
            if let Some(mut pair) = self.store.lock_partnered(user).await? {
                let partner = pair.that().user_id();
                let transcript = pair.this().transcript().to_vec();

                let mut this = pair.this().clone();
                let mut that = pair.that().clone();
                this.reset();
                this.set_blocked(true);
                that.reset();
                self.store.commit_pair(&mut pair, this, that).await?;

                tracing::info!(%user, %partner, messages = transcript.len(), "user blocked, chat closed");
                return Ok(BlockOutcome {
                    changed: true,
                    closed: Some(Disconnected {
                        partner,
                        log: ChatLog {
                            from: user,
                            to: partner,
                            reason: DisconnectReason::Blocked,
                            closed_at: Utc::now(),
                            transcript,
                        },
                    }),
                });
            }
        }

        let mut current = self.store.lock_existing(user).await?;
        if current.is_blocked() == blocked {
            return Ok(BlockOutcome {
                changed: false,
                closed: None,
            });
        }

        let was_searching = current.state() == SessionState::Searching;
        let mut next = current.clone();
        next.set_blocked(blocked);
        if blocked && was_searching {
            next.set_state(SessionState::Idle);
        }
        self.store.commit(&mut current, next).await?;
        if blocked && was_searching {
            queue.remove(user);
        }

        tracing::info!(%user, blocked, "block status changed");
        Ok(BlockOutcome {
            changed: true,
            closed: None,
        })
    }
}
