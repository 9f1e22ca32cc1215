use std::sync::Arc;

use chrono::Utc;

use crate::{
    domain::UserId,
    events::{ChatLog, DisconnectReason},
    matchmaker::{Matchmaker, SearchOutcome},
    store::SessionStore,
    Result,
};

/// Result of a disconnect that actually closed a chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disconnected {
    /// The user left behind.
    pub partner: UserId,
    pub log: ChatLog,
}

/// What `/next` did: the chat it closed, and how the new search went.
///
/// The close is already committed when the search runs, so a failed search is
/// reported alongside it instead of discarding it.
#[derive(Debug)]
pub struct NextOutcome {
    pub closed: Option<Disconnected>,
    pub search: Result<SearchOutcome>,
}

/// Tears down a pair: snapshot transcript, reset both records to Idle.
#[derive(Clone)]
pub struct DisconnectHandler {
    store: Arc<SessionStore>,
    matchmaker: Matchmaker,
}

impl DisconnectHandler {
    pub fn new(store: Arc<SessionStore>, matchmaker: Matchmaker) -> Self {
        Self { store, matchmaker }
    }

    /// Close `user`'s chat. `None` if they were not in one (repeat calls land here).
    pub async fn disconnect(
        &self,
        user: UserId,
        reason: DisconnectReason,
    ) -> Result<Option<Disconnected>> {
        let Some(mut pair) = self.store.lock_partnered(user).await? else {
            tracing::debug!(%user, %reason, "disconnect ignored, user not paired");
            return Ok(None);
        };

        let partner = pair.that().user_id();
        let transcript = pair.this().transcript().to_vec();

        let mut this = pair.this().clone();
        let mut that = pair.that().clone();
        this.reset();
        that.reset();
        self.store.commit_pair(&mut pair, this, that).await?;

        tracing::info!(
            %user,
            %partner,
            %reason,
            messages = transcript.len(),
            "chat closed"
        );

        Ok(Some(Disconnected {
            partner,
            log: ChatLog {
                from: user,
                to: partner,
                reason,
                closed_at: Utc::now(),
                transcript,
            },
        }))
    }

    /// Leave the current chat (if any) and go straight back to searching.
    ///
    /// Fails only if the disconnect itself fails; a search error after a committed
    /// close comes back in [`NextOutcome::search`].
    pub async fn next(&self, user: UserId) -> Result<NextOutcome> {
        let closed = self.disconnect(user, DisconnectReason::Next).await?;
        let search = self.matchmaker.request_search(user).await;
        if let Err(e) = &search {
            tracing::error!(%user, closed = closed.is_some(), "search after next failed: {e}");
        }
        Ok(NextOutcome { closed, search })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::Error, relay::Relay, session::SessionState, store::tests::FlakyBackend};

    struct Fixture {
        store: Arc<SessionStore>,
        mm: Matchmaker,
        relay: Relay,
        dc: DisconnectHandler,
    }

    fn fixture_with(store: Arc<SessionStore>) -> Fixture {
        let mm = Matchmaker::new(store.clone());
        Fixture {
            relay: Relay::new(store.clone()),
            dc: DisconnectHandler::new(store.clone(), mm.clone()),
            mm,
            store,
        }
    }

    async fn pair(f: &Fixture, a: i64, b: i64) {
        f.mm.request_search(UserId(a)).await.unwrap();
        f.mm.request_search(UserId(b)).await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_flushes_transcript_and_resets_both() {
        let f = fixture_with(Arc::new(SessionStore::in_memory()));
        pair(&f, 1, 2).await;
        f.relay.relay(UserId(1), "one").await.unwrap();
        f.relay.relay(UserId(2), "two").await.unwrap();
        f.relay.relay(UserId(1), "three").await.unwrap();

        let d = f
            .dc
            .disconnect(UserId(2), DisconnectReason::Stop)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.partner, UserId(1));
        assert_eq!(d.log.from, UserId(2));
        assert_eq!(d.log.to, UserId(1));
        assert_eq!(d.log.reason, DisconnectReason::Stop);

        let got: Vec<_> = d
            .log
            .transcript
            .iter()
            .map(|e| (e.sender.0, e.text.as_str()))
            .collect();
        assert_eq!(got, vec![(1, "one"), (2, "two"), (1, "three")]);

        for id in [1, 2] {
            let s = f.store.get(UserId(id)).await.unwrap();
            assert_eq!(s.state(), SessionState::Idle);
            assert_eq!(s.partner_id(), None);
            assert!(s.transcript().is_empty());
        }
    }

    #[tokio::test]
    async fn second_disconnect_is_a_no_op() {
        let f = fixture_with(Arc::new(SessionStore::in_memory()));
        pair(&f, 1, 2).await;

        assert!(f
            .dc
            .disconnect(UserId(1), DisconnectReason::Stop)
            .await
            .unwrap()
            .is_some());
        assert!(f
            .dc
            .disconnect(UserId(1), DisconnectReason::Stop)
            .await
            .unwrap()
            .is_none());
        // The partner's side is gone too.
        assert!(f
            .dc
            .disconnect(UserId(2), DisconnectReason::Stop)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn disconnect_of_searching_user_keeps_them_queued() {
        let f = fixture_with(Arc::new(SessionStore::in_memory()));
        f.mm.request_search(UserId(7)).await.unwrap();

        assert!(f
            .dc
            .disconnect(UserId(7), DisconnectReason::Stop)
            .await
            .unwrap()
            .is_none());
        assert_eq!(f.store.waiting().await, vec![UserId(7)]);
    }

    #[tokio::test]
    async fn next_requeues_only_the_leaver() {
        let f = fixture_with(Arc::new(SessionStore::in_memory()));
        pair(&f, 1, 2).await;

        let next = f.dc.next(UserId(1)).await.unwrap();
        let closed = next.closed.unwrap();
        assert_eq!(closed.partner, UserId(2));
        assert_eq!(closed.log.reason, DisconnectReason::Next);
        assert_eq!(next.search.unwrap(), SearchOutcome::Queued);

        assert_eq!(f.store.waiting().await, vec![UserId(1)]);
        assert_eq!(
            f.store.get(UserId(2)).await.unwrap().state(),
            SessionState::Idle
        );

        // Someone else arriving now meets the requeued user.
        let outcome = f.mm.request_search(UserId(3)).await.unwrap();
        assert_eq!(
            outcome,
            SearchOutcome::Matched {
                partner: UserId(1)
            }
        );
    }

    #[tokio::test]
    async fn failed_unpair_keeps_chat_intact() {
        let backend = Arc::new(FlakyBackend::default());
        let f = fixture_with(Arc::new(SessionStore::new(backend.clone())));
        pair(&f, 1, 2).await;
        f.relay.relay(UserId(1), "still here").await.unwrap();

        backend.fail(true);
        assert!(f
            .dc
            .disconnect(UserId(1), DisconnectReason::Stop)
            .await
            .is_err());

        let a = f.store.get(UserId(1)).await.unwrap();
        let b = f.store.get(UserId(2)).await.unwrap();
        assert_eq!(a.partner_id(), Some(UserId(2)));
        assert_eq!(b.partner_id(), Some(UserId(1)));
        assert_eq!(a.transcript().len(), 1);
    }

    #[tokio::test]
    async fn next_keeps_the_closed_chat_when_requeue_fails() {
        let backend = Arc::new(FlakyBackend::default());
        let f = fixture_with(Arc::new(SessionStore::new(backend.clone())));
        pair(&f, 1, 2).await;
        f.relay.relay(UserId(1), "secret").await.unwrap();

        // The unpair is written, the search that follows is not.
        backend.fail_after(1);
        let next = f.dc.next(UserId(1)).await.unwrap();

        let closed = next.closed.unwrap();
        assert_eq!(closed.partner, UserId(2));
        assert_eq!(closed.log.transcript.len(), 1);
        assert_eq!(closed.log.transcript[0].text, "secret");
        assert!(matches!(next.search, Err(Error::Storage(_))));

        for id in [1, 2] {
            let s = f.store.get(UserId(id)).await.unwrap();
            assert_eq!(s.state(), SessionState::Idle);
            assert!(s.transcript().is_empty());
        }
        assert!(f.store.waiting().await.is_empty());
    }

    #[tokio::test]
    async fn next_fails_outright_when_unpair_fails() {
        let backend = Arc::new(FlakyBackend::default());
        let f = fixture_with(Arc::new(SessionStore::new(backend.clone())));
        pair(&f, 1, 2).await;

        backend.fail(true);
        assert!(f.dc.next(UserId(1)).await.is_err());
        assert_eq!(
            f.store.get(UserId(1)).await.unwrap().partner_id(),
            Some(UserId(2))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn relays_racing_a_disconnect_are_logged_or_refused() {
        const SENT: usize = 200;
        let f = fixture_with(Arc::new(SessionStore::in_memory()));
        pair(&f, 1, 2).await;

        let mut senders = Vec::with_capacity(SENT);
        for i in 0..SENT {
            let relay = f.relay.clone();
            senders.push(tokio::spawn(async move {
                relay.relay(UserId(1), &format!("m{i}")).await
            }));
        }
        let dc = f.dc.clone();
        let closer =
            tokio::spawn(async move { dc.disconnect(UserId(2), DisconnectReason::Stop).await });

        let mut delivered = 0;
        let mut refused = 0;
        for s in senders {
            match s.await.unwrap() {
                Ok(_) => delivered += 1,
                Err(Error::NotPaired(UserId(1))) => refused += 1,
                Err(other) => panic!("unexpected relay error: {other}"),
            }
        }
        let log = closer.await.unwrap().unwrap().unwrap().log;

        assert_eq!(delivered + refused, SENT);
        assert_eq!(log.transcript.len(), delivered);
        assert!(log.transcript.iter().all(|e| e.sender == UserId(1)));

        for id in [1, 2] {
            let s = f.store.get(UserId(id)).await.unwrap();
            assert_eq!(s.state(), SessionState::Idle);
            assert!(s.transcript().is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_disconnects_close_the_chat_once() {
        let f = fixture_with(Arc::new(SessionStore::in_memory()));
        pair(&f, 1, 2).await;

        let (a, b) = tokio::join!(
            f.dc.disconnect(UserId(1), DisconnectReason::Stop),
            f.dc.disconnect(UserId(2), DisconnectReason::Stop),
        );
        let closed = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(Option::is_some)
            .count();
        assert_eq!(closed, 1);
    }
}
