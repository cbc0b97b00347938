//! Room coordinator actor
//!
//! The `Room` is the single owner of the membership set. Every mutation
//! (join, leave, broadcast) arrives as a `RoomCommand` on one channel and is
//! applied inside `Room::run`, so no lock guards the membership map.
//!
//! Shutdown is a `CancellationToken`: cancelling it stops the loop, closes
//! every remaining mailbox and, through child tokens, reaches every client.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::membership::{Member, Membership};
use crate::message::Message;
use crate::types::ClientId;

/// Channel buffer size for room commands
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Commands sent from clients to the Room actor
#[derive(Debug)]
pub enum RoomCommand {
    /// Register a client's mailbox
    Join { member: Member },
    /// Remove a client and close its mailbox
    Leave { client_id: ClientId },
    /// Fan a message out to the other members
    Broadcast { message: Arc<Message> },
}

/// Handle to the Room actor
///
/// Cheap to clone. None of the operations report failure: once the room has
/// stopped they silently do nothing, and a refused join simply leaves the
/// caller with a closed mailbox.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomCommand>,
    cancel_token: CancellationToken,
}

impl RoomHandle {
    /// Register `member` so it receives broadcasts
    pub async fn join(&self, member: Member) {
        if self.is_shutdown() {
            debug!(client = %member.id, "Room stopped, join refused");
            return;
        }
        self.send(RoomCommand::Join { member }).await;
    }

    /// Remove a client if present; a no-op for unknown clients
    pub async fn leave(&self, client_id: ClientId) {
        self.send(RoomCommand::Leave { client_id }).await;
    }

    /// Deliver `message` to every member (except its sender when
    /// self-suppression is on)
    pub async fn broadcast(&self, message: Message) {
        self.send(RoomCommand::Broadcast {
            message: Arc::new(message),
        })
        .await;
    }

    /// Stop the room and disconnect every member
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the room has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token for a client's loops; cancelled when the room shuts down
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn send(&self, cmd: RoomCommand) {
        tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => {
                debug!("Room stopped, command dropped");
            }
            result = self.sender.send(cmd) => {
                if result.is_err() {
                    debug!("Room closed, command dropped");
                }
            }
        }
    }
}

/// The Room actor
pub struct Room {
    /// Cosmetic label used in logs
    name: String,
    /// Current members; only touched inside `run`
    members: Membership,
    /// Command receiver channel
    receiver: mpsc::Receiver<RoomCommand>,
    /// Shutdown signal, derived from the caller's lifetime token
    cancel_token: CancellationToken,
}

impl Room {
    /// Create a Room and its handle
    ///
    /// The room stops when `shutdown` is called on any handle, when `parent`
    /// is cancelled, or when every handle has been dropped.
    pub fn new(
        name: impl Into<String>,
        self_suppress: bool,
        parent: &CancellationToken,
    ) -> (Self, RoomHandle) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let cancel_token = parent.child_token();

        let room = Self {
            name: name.into(),
            members: Membership::new(self_suppress),
            receiver,
            cancel_token: cancel_token.clone(),
        };
        let handle = RoomHandle {
            sender,
            cancel_token,
        };

        (room, handle)
    }

    /// Run the Room event loop until shutdown
    pub async fn run(mut self) {
        info!(room = %self.name, "Room started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
            }
        }

        // STOPPED: refuse further commands and release every mailbox
        self.cancel_token.cancel();
        self.receiver.close();
        let closed = self.members.close_all();

        info!(room = %self.name, disconnected = closed, "Room stopped");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join { member } => self.handle_join(member),
            RoomCommand::Leave { client_id } => self.handle_leave(client_id),
            RoomCommand::Broadcast { message } => self.handle_broadcast(message),
        }
    }

    fn handle_join(&mut self, member: Member) {
        let client_id = member.id.clone();
        if !self.members.insert(member) {
            warn!(room = %self.name, client = %client_id, "Client joined twice, replaced");
        }
        info!(
            room = %self.name,
            client = %client_id,
            members = self.members.len(),
            "Client joined"
        );
    }

    fn handle_leave(&mut self, client_id: ClientId) {
        if self.members.remove(&client_id) {
            info!(
                room = %self.name,
                client = %client_id,
                members = self.members.len(),
                "Client left"
            );
            if self.members.is_empty() {
                debug!(room = %self.name, "Room is empty");
            }
        }
    }

    fn handle_broadcast(&mut self, message: Arc<Message>) {
        let result = self.members.fan_out(&message);

        for client_id in &result.evicted {
            warn!(room = %self.name, client = %client_id, "Mailbox full, evicting client");
        }
        debug!(
            room = %self.name,
            from = %message.from(),
            delivered = result.delivered,
            evicted = result.evicted.len(),
            "Broadcast"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn start_room(self_suppress: bool) -> (RoomHandle, JoinHandle<()>) {
        let (room, handle) = Room::new("test", self_suppress, &CancellationToken::new());
        (handle, tokio::spawn(room.run()))
    }

    fn member(id: &str, capacity: usize) -> (Member, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Member::new(ClientId::from(id), tx), rx)
    }

    fn msg(from: &str, text: &str) -> Message {
        Message::new(ClientId::from(from), text).unwrap()
    }

    async fn recv(rx: &mut mpsc::Receiver<Arc<Message>>) -> Option<Arc<Message>> {
        timeout(WAIT, rx.recv()).await.expect("mailbox timed out")
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let (room, _task) = start_room(true);
        let (a, mut rx_a) = member("A", 8);
        let (b, mut rx_b) = member("B", 8);
        let (c, mut rx_c) = member("C", 8);
        room.join(a).await;
        room.join(b).await;
        room.join(c).await;

        room.broadcast(msg("A", "hi")).await;

        let got_b = recv(&mut rx_b).await.unwrap();
        let got_c = recv(&mut rx_c).await.unwrap();
        assert_eq!(*got_b, msg("A", "hi"));
        assert_eq!(*got_c, msg("A", "hi"));

        // Per-recipient order is preserved, so if A had received its own
        // message it would arrive before B's.
        room.broadcast(msg("B", "hey")).await;
        let got_a = recv(&mut rx_a).await.unwrap();
        assert_eq!(got_a.from().as_str(), "B");
    }

    #[tokio::test]
    async fn test_broadcast_echoes_when_not_suppressed() {
        let (room, _task) = start_room(false);
        let (a, mut rx_a) = member("A", 8);
        let (b, mut rx_b) = member("B", 8);
        room.join(a).await;
        room.join(b).await;

        room.broadcast(msg("A", "hi")).await;

        assert_eq!(*recv(&mut rx_a).await.unwrap(), msg("A", "hi"));
        assert_eq!(*recv(&mut rx_b).await.unwrap(), msg("A", "hi"));
    }

    #[tokio::test]
    async fn test_membership_follows_join_leave_sequence() {
        let (room, _task) = start_room(true);
        let (a, mut rx_a) = member("A", 8);
        let (b, mut rx_b) = member("B", 8);
        let (c, mut rx_c) = member("C", 8);
        let (d, mut rx_d) = member("D", 8);

        room.join(a).await;
        room.join(b).await;
        room.broadcast(msg("X", "one")).await;
        room.join(c).await;
        room.leave(ClientId::from("B")).await;
        room.join(d).await;
        room.leave(ClientId::from("A")).await;
        room.leave(ClientId::from("nobody")).await;
        room.broadcast(msg("X", "two")).await;

        // A and B saw the first broadcast, then their mailboxes closed
        assert_eq!(recv(&mut rx_a).await.unwrap().text(), "one");
        assert!(recv(&mut rx_a).await.is_none());
        assert_eq!(recv(&mut rx_b).await.unwrap().text(), "one");
        assert!(recv(&mut rx_b).await.is_none());

        // C and D joined after it and only see the second
        assert_eq!(recv(&mut rx_c).await.unwrap().text(), "two");
        assert_eq!(recv(&mut rx_d).await.unwrap().text(), "two");
    }

    #[tokio::test]
    async fn test_stalled_member_evicted_without_blocking() {
        let (room, _task) = start_room(true);
        let (a, mut rx_a) = member("A", 8);
        let (b, mut rx_b) = member("B", 1);
        let (c, mut rx_c) = member("C", 8);
        room.join(a).await;
        room.join(b).await;
        room.join(c).await;

        // B never drains: the first broadcast fills its only slot and the
        // second evicts it. Neither call may block.
        for text in ["1", "2", "3"] {
            timeout(WAIT, room.broadcast(msg("A", text)))
                .await
                .expect("broadcast blocked on a slow member");
        }

        for text in ["1", "2", "3"] {
            assert_eq!(recv(&mut rx_c).await.unwrap().text(), text);
        }
        assert_eq!(recv(&mut rx_b).await.unwrap().text(), "1");
        assert!(recv(&mut rx_b).await.is_none());

        // A still gets traffic from others
        room.broadcast(msg("C", "after")).await;
        assert_eq!(recv(&mut rx_a).await.unwrap().text(), "after");
    }

    #[tokio::test]
    async fn test_shutdown_closes_all_mailboxes() {
        let (room, task) = start_room(true);
        let (a, mut rx_a) = member("A", 8);
        let (b, mut rx_b) = member("B", 8);
        room.join(a).await;
        room.join(b).await;

        room.shutdown();
        assert!(room.is_shutdown());

        assert!(recv(&mut rx_a).await.is_none());
        assert!(recv(&mut rx_b).await.is_none());
        timeout(WAIT, task).await.expect("room loop hung").unwrap();

        // A join after shutdown never yields a live membership
        let (late, mut rx_late) = member("late", 8);
        room.join(late).await;
        room.broadcast(msg("A", "ignored")).await;
        assert!(recv(&mut rx_late).await.is_none());
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_room() {
        let parent = CancellationToken::new();
        let (room, handle) = Room::new("child", true, &parent);
        let task = tokio::spawn(room.run());

        let (a, mut rx_a) = member("A", 8);
        handle.join(a).await;

        parent.cancel();
        assert!(recv(&mut rx_a).await.is_none());
        timeout(WAIT, task).await.expect("room loop hung").unwrap();
        assert!(handle.child_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_room_stops_when_handles_dropped() {
        let (room, handle) = Room::new("orphan", true, &CancellationToken::new());
        let token = handle.child_token();
        let task = tokio::spawn(room.run());

        drop(handle);
        timeout(WAIT, task).await.expect("room loop hung").unwrap();
        assert!(token.is_cancelled());
    }
}
