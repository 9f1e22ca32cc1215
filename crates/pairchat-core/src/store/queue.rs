use std::collections::VecDeque;

use crate::domain::UserId;

/// FIFO of searching users. A user appears at most once.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    order: VecDeque<UserId>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Returns false if the user is already waiting.
    pub fn push_back(&mut self, user: UserId) -> bool {
        if self.contains(user) {
            return false;
        }
        self.order.push_back(user);
        true
    }

    /// Put a user back at the head (rollback of a failed match).
    pub(crate) fn push_front(&mut self, user: UserId) -> bool {
        if self.contains(user) {
            return false;
        }
        self.order.push_front(user);
        true
    }

    pub fn pop_front(&mut self) -> Option<UserId> {
        self.order.pop_front()
    }

    pub fn remove(&mut self, user: UserId) -> bool {
        let Some(idx) = self.position(user) else {
            return false;
        };
        self.order.remove(idx);
        true
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.order.contains(&user)
    }

    pub fn position(&self, user: UserId) -> Option<usize> {
        self.order.iter().position(|u| *u == user)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn to_vec(&self) -> Vec<UserId> {
        self.order.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_without_duplicates() {
        let mut q = WaitingQueue::new();
        assert!(q.push_back(UserId(1)));
        assert!(q.push_back(UserId(2)));
        assert!(!q.push_back(UserId(1)));
        assert_eq!(q.len(), 2);

        assert_eq!(q.pop_front(), Some(UserId(1)));
        assert!(q.push_front(UserId(1)));
        assert_eq!(q.to_vec(), vec![UserId(1), UserId(2)]);
    }

    #[test]
    fn remove_from_middle_keeps_order() {
        let mut q = WaitingQueue::new();
        for id in 1..=4 {
            q.push_back(UserId(id));
        }
        assert!(q.remove(UserId(3)));
        assert!(!q.remove(UserId(3)));
        assert_eq!(q.to_vec(), vec![UserId(1), UserId(2), UserId(4)]);
        assert_eq!(q.position(UserId(4)), Some(2));
    }
}
