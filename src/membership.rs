//! Membership set owned by the room loop
//!
//! Each `Member` holds the only sender into a client's mailbox, so removing
//! a member from the set is what closes its mailbox. That makes "close at
//! most once" a property of the map rather than a rule callers must follow.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::message::Message;
use crate::types::ClientId;

/// Room-side record of a connected client
#[derive(Debug)]
pub struct Member {
    /// Identity of the client behind this mailbox
    pub id: ClientId,
    /// Room -> Client mailbox (the only sender)
    mailbox: mpsc::Sender<Arc<Message>>,
}

impl Member {
    /// Create a member from a client ID and its mailbox sender
    pub fn new(id: ClientId, mailbox: mpsc::Sender<Arc<Message>>) -> Self {
        Self { id, mailbox }
    }
}

/// Result of fanning one message out to the room
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Number of mailboxes that accepted the message
    pub delivered: usize,
    /// Members dropped because their mailbox was full or gone
    pub evicted: Vec<ClientId>,
}

/// Set of current room members
#[derive(Debug)]
pub struct Membership {
    members: HashMap<ClientId, Member>,
    self_suppress: bool,
}

impl Membership {
    /// Create an empty set
    ///
    /// With `self_suppress` set, a message is never delivered back to the
    /// member whose identity matches its sender.
    pub fn new(self_suppress: bool) -> Self {
        Self {
            members: HashMap::new(),
            self_suppress,
        }
    }

    /// Add a member
    ///
    /// Returns false if the ID was already present; the previous member is
    /// replaced and its mailbox closed.
    pub fn insert(&mut self, member: Member) -> bool {
        self.members.insert(member.id.clone(), member).is_none()
    }

    /// Remove a member, closing its mailbox
    ///
    /// Returns false (and does nothing) for an unknown ID.
    pub fn remove(&mut self, id: &ClientId) -> bool {
        self.members.remove(id).is_some()
    }

    /// Offer `message` to every eligible member without waiting
    ///
    /// A member whose mailbox is full or closed is evicted on the spot.
    pub fn fan_out(&mut self, message: &Arc<Message>) -> FanOut {
        let suppress = self.self_suppress;
        let mut result = FanOut::default();

        self.members.retain(|id, member| {
            if suppress && id == message.from() {
                return true;
            }
            match member.mailbox.try_send(Arc::clone(message)) {
                Ok(()) => {
                    result.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                    result.evicted.push(id.clone());
                    false
                }
            }
        });

        result
    }

    /// Remove every member, closing all mailboxes
    ///
    /// Returns how many members were removed.
    pub fn close_all(&mut self) -> usize {
        let count = self.members.len();
        self.members.clear();
        count
    }

    #[cfg(test)]
    fn contains(&self, id: &ClientId) -> bool {
        self.members.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn member(id: &str, capacity: usize) -> (Member, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Member::new(ClientId::from(id), tx), rx)
    }

    fn msg(from: &str, text: &str) -> Arc<Message> {
        Arc::new(Message::new(ClientId::from(from), text).unwrap())
    }

    #[test]
    fn test_insert_and_remove() {
        let mut set = Membership::new(true);
        let (a, _rx_a) = member("a", 4);
        let (b, _rx_b) = member("b", 4);

        assert!(set.insert(a));
        assert!(set.insert(b));
        assert_eq!(set.len(), 2);

        assert!(set.remove(&ClientId::from("a")));
        assert!(!set.contains(&ClientId::from("a")));
        assert!(set.contains(&ClientId::from("b")));

        // Unknown member is a no-op
        assert!(!set.remove(&ClientId::from("a")));
        assert!(!set.remove(&ClientId::from("zzz")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_closes_mailbox() {
        let mut set = Membership::new(true);
        let (a, mut rx_a) = member("a", 4);
        set.insert(a);

        set.remove(&ClientId::from("a"));
        assert_eq!(rx_a.try_recv().unwrap_err(), TryRecvError::Disconnected);
    }

    #[test]
    fn test_fan_out_self_suppressed() {
        let mut set = Membership::new(true);
        let (a, mut rx_a) = member("A", 4);
        let (b, mut rx_b) = member("B", 4);
        let (c, mut rx_c) = member("C", 4);
        set.insert(a);
        set.insert(b);
        set.insert(c);

        let result = set.fan_out(&msg("A", "hi"));
        assert_eq!(result.delivered, 2);
        assert!(result.evicted.is_empty());

        assert_eq!(rx_b.try_recv().unwrap().text(), "hi");
        assert_eq!(rx_c.try_recv().unwrap().from().as_str(), "A");
        assert_eq!(rx_a.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(rx_b.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_fan_out_with_echo() {
        let mut set = Membership::new(false);
        let (a, mut rx_a) = member("A", 4);
        let (b, mut rx_b) = member("B", 4);
        set.insert(a);
        set.insert(b);

        let result = set.fan_out(&msg("A", "hi"));
        assert_eq!(result.delivered, 2);
        assert_eq!(rx_a.try_recv().unwrap().text(), "hi");
        assert_eq!(rx_b.try_recv().unwrap().text(), "hi");
    }

    #[test]
    fn test_full_mailbox_evicted() {
        let mut set = Membership::new(true);
        let (a, _rx_a) = member("A", 4);
        let (b, mut rx_b) = member("B", 1);
        set.insert(a);
        set.insert(b);

        // First message fills B's single slot
        assert_eq!(set.fan_out(&msg("A", "one")).delivered, 1);

        let result = set.fan_out(&msg("A", "two"));
        assert_eq!(result.delivered, 0);
        assert_eq!(result.evicted, vec![ClientId::from("B")]);
        assert!(!set.contains(&ClientId::from("B")));

        // Backlog still drains, then the mailbox reports closed
        assert_eq!(rx_b.try_recv().unwrap().text(), "one");
        assert_eq!(rx_b.try_recv().unwrap_err(), TryRecvError::Disconnected);

        // Further broadcasts no longer consider B
        assert_eq!(set.fan_out(&msg("A", "three")), FanOut::default());
    }

    #[test]
    fn test_dropped_receiver_evicted() {
        let mut set = Membership::new(true);
        let (a, rx_a) = member("A", 4);
        set.insert(a);
        drop(rx_a);

        let result = set.fan_out(&msg("B", "anyone?"));
        assert_eq!(result.evicted, vec![ClientId::from("A")]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_close_all() {
        let mut set = Membership::new(true);
        let (a, mut rx_a) = member("A", 4);
        let (b, mut rx_b) = member("B", 4);
        set.insert(a);
        set.insert(b);

        assert_eq!(set.close_all(), 2);
        assert!(set.is_empty());
        assert_eq!(rx_a.try_recv().unwrap_err(), TryRecvError::Disconnected);
        assert_eq!(rx_b.try_recv().unwrap_err(), TryRecvError::Disconnected);
    }

    #[test]
    fn test_reinsert_replaces_and_closes_previous() {
        let mut set = Membership::new(true);
        let (first, mut rx_first) = member("A", 4);
        let (second, _rx_second) = member("A", 4);

        assert!(set.insert(first));
        assert!(!set.insert(second));
        assert_eq!(set.len(), 1);
        assert_eq!(rx_first.try_recv().unwrap_err(), TryRecvError::Disconnected);
    }
}
