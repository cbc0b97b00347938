//! Connection actor
//!
//! A `Client` bridges one peer's WebSocket to the room with two loops:
//!
//! - the read loop turns inbound text frames into broadcasts and enforces
//!   the read deadline (any inbound frame, pongs included, resets it);
//! - the write loop drains the mailbox, coalescing backlog into one frame,
//!   and sends keepalive pings.
//!
//! The mailbox is closed only by the room. Either loop stopping cancels the
//! client's token so the other follows, and the socket is closed through
//! `Writer::close`, which is safe to call from both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as Frame};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::AppError;
use crate::membership::Member;
use crate::message::{Message, WireFormat, DELIMITER};
use crate::room::RoomHandle;
use crate::types::ClientId;

/// A connected peer, ready to be started
pub struct Client<S> {
    id: ClientId,
    room: RoomHandle,
    ws: WebSocketStream<S>,
    /// Room-side half of the mailbox, handed over on join
    member: Member,
    mailbox: mpsc::Receiver<Arc<Message>>,
    /// Child of the room's token
    cancel_token: CancellationToken,
    config: ClientConfig,
}

/// Join handles for a started client's loops
pub struct ClientTasks {
    pub read: JoinHandle<()>,
    pub write: JoinHandle<()>,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create a client for an upgraded stream
    ///
    /// Fails only if no identity can be generated.
    pub fn new(
        room: RoomHandle,
        ws: WebSocketStream<S>,
        config: ClientConfig,
    ) -> Result<Self, AppError> {
        let id = ClientId::generate()?;
        let (sender, mailbox) = mpsc::channel(config.mailbox_capacity.max(1));
        let cancel_token = room.child_token();

        Ok(Self {
            member: Member::new(id.clone(), sender),
            id,
            room,
            ws,
            mailbox,
            cancel_token,
            config,
        })
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Join the room and spawn both loops on `tracker`
    pub async fn start(self, tracker: &TaskTracker) -> ClientTasks {
        let Self {
            id,
            room,
            ws,
            member,
            mailbox,
            cancel_token,
            config,
        } = self;

        room.join(member).await;

        let (sink, stream) = ws.split();
        let writer = Arc::new(Writer::new(sink, config.write_wait));

        let read = tracker.spawn(read_loop(
            id.clone(),
            room,
            stream,
            Arc::clone(&writer),
            cancel_token.clone(),
            config.pong_wait,
        ));
        let write = tracker.spawn(write_loop(
            id,
            mailbox,
            writer,
            cancel_token,
            config.ping_period,
            config.wire_format,
            config.mailbox_capacity,
        ));

        ClientTasks { read, write }
    }
}

/// Outbound half of the socket, shared by both loops
///
/// Writes are serialized by the mutex; `close` runs at most once.
struct Writer<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Frame>>,
    closed: AtomicBool,
    write_wait: Duration,
}

impl<S> Writer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(sink: SplitSink<WebSocketStream<S>, Frame>, write_wait: Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            write_wait,
        }
    }

    /// Send one frame within the write deadline
    async fn send(&self, frame: Frame) -> Result<(), AppError> {
        let mut sink = self.sink.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::ConnectionClosed);
        }
        time::timeout(self.write_wait, sink.send(frame))
            .await
            .map_err(|_| AppError::WriteTimeout)??;
        Ok(())
    }

    /// Send a close frame and shut the sink; later calls do nothing
    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        match time::timeout(self.write_wait, sink.close()).await {
            Ok(Ok(())) | Ok(Err(WsError::ConnectionClosed)) | Ok(Err(WsError::AlreadyClosed)) => {}
            Ok(Err(e)) => debug!(error = %e, "Close failed"),
            Err(_) => debug!("Close timed out"),
        }
    }
}

/// Inbound loop: WebSocket -> Room
async fn read_loop<S>(
    id: ClientId,
    room: RoomHandle,
    mut stream: SplitStream<WebSocketStream<S>>,
    writer: Arc<Writer<S>>,
    cancel_token: CancellationToken,
    pong_wait: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(client = %id, "Read loop cancelled");
                break;
            }
            next = time::timeout(pong_wait, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                info!(client = %id, "Read deadline exceeded, dropping client");
                break;
            }
            Ok(None) => {
                debug!(client = %id, "Stream ended");
                break;
            }
            Ok(Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed))) => {
                debug!(client = %id, "Connection closed");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!(client = %id, error = %e, "Read failed, dropping client");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Text(text) => relay(&id, &room, &text).await,
            Frame::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => relay(&id, &room, text).await,
                Err(_) => {
                    let err = AppError::MalformedFrame;
                    warn!(client = %id, error = %err, "Dropping client");
                    break;
                }
            },
            Frame::Ping(_) => trace!(client = %id, "Ping"),
            Frame::Pong(_) => trace!(client = %id, "Pong"),
            Frame::Close(_) => {
                debug!(client = %id, "Client sent close frame");
                break;
            }
            Frame::Frame(_) => {}
        }
    }

    room.leave(id.clone()).await;
    cancel_token.cancel();
    writer.close().await;

    debug!(client = %id, "Read loop ended");
}

/// Normalize one inbound payload and hand it to the room
async fn relay(id: &ClientId, room: &RoomHandle, text: &str) {
    match Message::new(id.clone(), text) {
        Some(message) => room.broadcast(message).await,
        None => trace!(client = %id, "Ignoring blank message"),
    }
}

/// Outbound loop: mailbox -> WebSocket
async fn write_loop<S>(
    id: ClientId,
    mut mailbox: mpsc::Receiver<Arc<Message>>,
    writer: Arc<Writer<S>>,
    cancel_token: CancellationToken,
    ping_period: Duration,
    format: WireFormat,
    max_batch: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = time::interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(client = %id, "Write loop cancelled");
                break;
            }
            mail = mailbox.recv() => {
                let Some(first) = mail else {
                    // The room closed our mailbox: tell the peer we are done
                    debug!(client = %id, "Mailbox closed");
                    writer.close().await;
                    break;
                };

                let frame = coalesce(&first, &mut mailbox, format, max_batch);
                if frame.is_empty() {
                    continue;
                }
                if let Err(e) = writer.send(Frame::Text(frame.into())).await {
                    debug!(client = %id, error = %e, "Write failed");
                    break;
                }
            }
            _ = ticker.tick() => {
                trace!(client = %id, "Sending ping");
                if let Err(e) = writer.send(Frame::Ping(Vec::new())).await {
                    debug!(client = %id, error = %e, "Ping failed");
                    break;
                }
            }
        }
    }

    cancel_token.cancel();
    debug!(client = %id, "Write loop ended");
}

/// Encode `first` plus whatever is already queued (at most `max_batch`
/// more) as newline-separated lines of one frame
fn coalesce(
    first: &Message,
    mailbox: &mut mpsc::Receiver<Arc<Message>>,
    format: WireFormat,
    max_batch: usize,
) -> String {
    let mut frame = String::new();
    append(&mut frame, first, format);

    for _ in 0..max_batch {
        match mailbox.try_recv() {
            Ok(next) => append(&mut frame, &next, format),
            Err(_) => break,
        }
    }

    frame
}

fn append(frame: &mut String, message: &Message, format: WireFormat) {
    match message.encode(format) {
        Ok(line) => {
            if !frame.is_empty() {
                frame.push(DELIMITER);
            }
            frame.push_str(&line);
        }
        Err(e) => error!(error = %e, "Failed to encode message"),
    }
}
