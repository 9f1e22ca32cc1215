//! Session registry: owns every [`UserSession`] and the waiting queue.
//!
//! Locking discipline:
//! - the queue lock is taken first, and only by search, cancel and block;
//! - user locks are taken after it, two at a time in ascending `UserId` order;
//! - the registry map lock is never held while waiting on a user lock or the backend.
//!
//! Mutations of persisted fields go through [`SessionStore::commit`] /
//! [`SessionStore::commit_pair`], which write to the backend before touching memory.

pub mod backend;
pub mod queue;

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use crate::{
    domain::UserId,
    errors::Error,
    session::{SessionState, StoredSession, UserSession},
    Result,
};

pub use backend::{JsonFileBackend, MemoryBackend, SessionBackend};
pub use queue::WaitingQueue;

type Slot = Arc<Mutex<UserSession>>;

/// Counters for the admin dashboard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub known_users: usize,
    pub searching: usize,
    pub paired_users: usize,
    pub premium_users: usize,
    pub blocked_users: usize,
}

pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    slots: Mutex<HashMap<UserId, Slot>>,
    /// Serializes first-contact loads so a user is read from the backend once.
    loading: Mutex<()>,
    queue: Mutex<WaitingQueue>,
}

/// Both records of a (prospective) pair, locked in id order.
///
/// `this` is the user the operation was issued for, `that` the other side.
pub(crate) struct PairGuard {
    this: OwnedMutexGuard<UserSession>,
    that: OwnedMutexGuard<UserSession>,
}

impl PairGuard {
    pub(crate) fn this(&self) -> &UserSession {
        &self.this
    }

    pub(crate) fn that(&self) -> &UserSession {
        &self.that
    }

    pub(crate) fn both_mut(&mut self) -> (&mut UserSession, &mut UserSession) {
        (&mut *self.this, &mut *self.that)
    }
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            slots: Mutex::new(HashMap::new()),
            loading: Mutex::new(()),
            queue: Mutex::new(WaitingQueue::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Snapshot of a user's record, creating an Idle one on first contact.
    pub async fn get(&self, user: UserId) -> Result<UserSession> {
        Ok(self.lock_user(user).await?.clone())
    }

    /// Snapshot of a user's record; [`Error::UnknownUser`] if never seen.
    pub async fn find(&self, user: UserId) -> Result<UserSession> {
        Ok(self.lock_existing(user).await?.clone())
    }

    /// Queue contents, head first.
    pub async fn waiting(&self) -> Vec<UserId> {
        self.queue.lock().await.to_vec()
    }

    pub async fn stats(&self) -> StoreStats {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        let now = Utc::now();
        let mut stats = StoreStats {
            known_users: slots.len(),
            ..StoreStats::default()
        };
        for slot in slots {
            let s = slot.lock().await;
            match s.state() {
                SessionState::Searching => stats.searching += 1,
                SessionState::Paired => stats.paired_users += 1,
                SessionState::Idle => {}
            }
            if s.is_premium_at(now) {
                stats.premium_users += 1;
            }
            if s.is_blocked() {
                stats.blocked_users += 1;
            }
        }
        stats
    }

    pub(crate) async fn queue(&self) -> MutexGuard<'_, WaitingQueue> {
        self.queue.lock().await
    }

    pub(crate) async fn lock_user(&self, user: UserId) -> Result<OwnedMutexGuard<UserSession>> {
        let slot = self.slot(user, true).await?.ok_or(Error::UnknownUser(user))?;
        Ok(slot.lock_owned().await)
    }

    pub(crate) async fn lock_existing(
        &self,
        user: UserId,
    ) -> Result<OwnedMutexGuard<UserSession>> {
        let slot = self.slot(user, false).await?.ok_or(Error::UnknownUser(user))?;
        Ok(slot.lock_owned().await)
    }

    /// Lock two distinct users in ascending id order.
    pub(crate) async fn lock_pair(&self, this: UserId, that: UserId) -> Result<PairGuard> {
        if this == that {
            return Err(Error::InvalidState {
                user: this,
                state: SessionState::Searching,
                action: "pair with themselves",
            });
        }

        let this_slot = self.slot(this, true).await?.ok_or(Error::UnknownUser(this))?;
        let that_slot = self.slot(that, true).await?.ok_or(Error::UnknownUser(that))?;

        let (this, that) = if this < that {
            let a = this_slot.lock_owned().await;
            let b = that_slot.lock_owned().await;
            (a, b)
        } else {
            let b = that_slot.lock_owned().await;
            let a = this_slot.lock_owned().await;
            (a, b)
        };
        Ok(PairGuard { this, that })
    }

    /// Lock a user together with their current partner.
    ///
    /// Returns `None` when the user is not paired. The partner is read under a single
    /// lock and the link re-checked once both are held; if it changed meanwhile the
    /// lookup starts over.
    pub(crate) async fn lock_partnered(&self, user: UserId) -> Result<Option<PairGuard>> {
        loop {
            let partner = {
                let s = self.lock_user(user).await?;
                match (s.state(), s.partner_id()) {
                    (SessionState::Paired, Some(p)) => p,
                    _ => return Ok(None),
                }
            };

            let pair = self.lock_pair(user, partner).await?;
            if pair.this().partner_id() != Some(partner) {
                tracing::debug!(%user, %partner, "pairing changed while locking, retrying");
                continue;
            }
            if pair.that().partner_id() != Some(user) {
                tracing::error!(
                    %user,
                    %partner,
                    partner_of_partner = ?pair.that().partner_id(),
                    "asymmetric pairing detected"
                );
                return Err(Error::Storage(format!(
                    "asymmetric pairing between {user} and {partner}"
                )));
            }
            return Ok(Some(pair));
        }
    }

    /// Persist `next` and then install it in place of the locked record.
    pub(crate) async fn commit(
        &self,
        guard: &mut OwnedMutexGuard<UserSession>,
        next: UserSession,
    ) -> Result<()> {
        self.backend.save(&[StoredSession::from(&next)]).await?;
        **guard = next;
        Ok(())
    }

    /// Persist both records of a pair together, then install them.
    pub(crate) async fn commit_pair(
        &self,
        pair: &mut PairGuard,
        this: UserSession,
        that: UserSession,
    ) -> Result<()> {
        self.backend
            .save(&[StoredSession::from(&this), StoredSession::from(&that)])
            .await?;
        *pair.this = this;
        *pair.that = that;
        Ok(())
    }

    async fn slot(&self, user: UserId, create: bool) -> Result<Option<Slot>> {
        if let Some(slot) = self.slots.lock().await.get(&user) {
            return Ok(Some(slot.clone()));
        }

        let _loading = self.loading.lock().await;
        if let Some(slot) = self.slots.lock().await.get(&user) {
            return Ok(Some(slot.clone()));
        }

        let session = match self.backend.load(user).await? {
            Some(stored) => UserSession::restore(stored),
            None if create => {
                let fresh = UserSession::new(user);
                self.backend.save(&[StoredSession::from(&fresh)]).await?;
                tracing::debug!(%user, "new user session");
                fresh
            }
            None => return Ok(None),
        };

        let slot = Arc::new(Mutex::new(session));
        self.slots.lock().await.insert(user, slot.clone());
        Ok(Some(slot))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend that can be switched to fail every write, or every write after a budget.
    #[derive(Default)]
    pub(crate) struct FlakyBackend {
        inner: MemoryBackend,
        pub(crate) failing: AtomicBool,
        budget: std::sync::Mutex<Option<usize>>,
    }

    impl FlakyBackend {
        pub(crate) fn fail(&self, on: bool) {
            self.failing.store(on, Ordering::SeqCst);
        }

        /// Let `saves` more writes through, then fail the rest.
        pub(crate) fn fail_after(&self, saves: usize) {
            *self.budget.lock().unwrap() = Some(saves);
        }
    }

    #[async_trait]
    impl SessionBackend for FlakyBackend {
        async fn load(&self, user: UserId) -> Result<Option<StoredSession>> {
            self.inner.load(user).await
        }

        async fn load_all(&self) -> Result<Vec<StoredSession>> {
            self.inner.load_all().await
        }

        async fn save(&self, records: &[StoredSession]) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Storage("disk full".to_string()));
            }
            {
                let mut budget = self.budget.lock().unwrap();
                match budget.as_mut() {
                    Some(0) => return Err(Error::Storage("disk full".to_string())),
                    Some(n) => *n -= 1,
                    None => {}
                }
            }
            self.inner.save(records).await
        }
    }

    #[tokio::test]
    async fn get_creates_idle_record_once() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(backend.clone());

        let s = store.get(UserId(3)).await.unwrap();
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(backend.load_all().await.unwrap().len(), 1);

        let again = store.get(UserId(3)).await.unwrap();
        assert_eq!(s, again);
        assert_eq!(store.stats().await.known_users, 1);
    }

    #[tokio::test]
    async fn find_reports_unknown_users() {
        let store = SessionStore::in_memory();
        let err = store.find(UserId(9)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownUser(UserId(9))));

        store.get(UserId(9)).await.unwrap();
        assert!(store.find(UserId(9)).await.is_ok());
    }

    #[tokio::test]
    async fn records_from_backend_come_back_idle() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .save(&[StoredSession {
                user_id: UserId(1),
                state: SessionState::Paired,
                partner_id: Some(UserId(2)),
                premium: true,
                premium_expiry: None,
                blocked: false,
            }])
            .await
            .unwrap();

        let store = SessionStore::new(backend);
        let s = store.find(UserId(1)).await.unwrap();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.is_premium());
    }

    #[tokio::test]
    async fn failed_commit_leaves_memory_untouched() {
        let backend = Arc::new(FlakyBackend::default());
        let store = SessionStore::new(backend.clone());
        store.get(UserId(1)).await.unwrap();

        backend.fail(true);
        let mut guard = store.lock_user(UserId(1)).await.unwrap();
        let mut next = guard.clone();
        next.set_state(SessionState::Searching);
        assert!(store.commit(&mut guard, next).await.is_err());
        drop(guard);

        assert_eq!(
            store.get(UserId(1)).await.unwrap().state(),
            SessionState::Idle
        );
    }

    /// Backend whose writes park until released.
    #[derive(Default)]
    struct GatedBackend {
        inner: MemoryBackend,
        hold: AtomicBool,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl SessionBackend for GatedBackend {
        async fn load(&self, user: UserId) -> Result<Option<StoredSession>> {
            self.inner.load(user).await
        }

        async fn load_all(&self) -> Result<Vec<StoredSession>> {
            self.inner.load_all().await
        }

        async fn save(&self, records: &[StoredSession]) -> Result<()> {
            if self.hold.load(Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.save(records).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_first_contact_does_not_stall_known_users() {
        let backend = Arc::new(GatedBackend::default());
        let store = Arc::new(SessionStore::new(backend.clone()));
        store.get(UserId(1)).await.unwrap();

        backend.hold.store(true, Ordering::SeqCst);
        let newcomer = {
            let store = store.clone();
            tokio::spawn(async move { store.get(UserId(2)).await })
        };
        backend.entered.notified().await;

        let known = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            store.get(UserId(1)),
        )
        .await;
        assert!(known.is_ok(), "lookup of a known user waited on the backend");

        backend.release.notify_one();
        assert_eq!(newcomer.await.unwrap().unwrap().user_id(), UserId(2));
        assert_eq!(store.stats().await.known_users, 2);
    }

    #[tokio::test]
    async fn lock_pair_rejects_self() {
        let store = SessionStore::in_memory();
        assert!(matches!(
            store.lock_pair(UserId(4), UserId(4)).await.err(),
            Some(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn lock_pair_orients_guards_by_caller() {
        let store = SessionStore::in_memory();
        let pair = store.lock_pair(UserId(9), UserId(2)).await.unwrap();
        assert_eq!(pair.this().user_id(), UserId(9));
        assert_eq!(pair.that().user_id(), UserId(2));
    }
}
