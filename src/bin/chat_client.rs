//! Terminal peer for the chat relay
//!
//! Sends every stdin line as a message and prints what the room relays.
//! Your own lines are shown immediately as `you: ...`, without waiting for
//! the server.
//!
//! Usage: `chat_client [ws://127.0.0.1:3000/v1/ws]`
//! Set `CHAT_WIRE_FORMAT=text` when the relay runs in text mode.

use std::env;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use chat_relay::config::MAX_MESSAGE_SIZE;
use chat_relay::message::normalize;
use chat_relay::{decode_frame, ClientId, WireFormat};

/// Default relay URL
const DEFAULT_URL: &str = "ws://127.0.0.1:3000/v1/ws";

/// Characters of a sender ID shown per line
const SENDER_PREFIX_LEN: usize = 6;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_client=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let url = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    let format: WireFormat = match env::var("CHAT_WIRE_FORMAT") {
        Ok(value) => value.parse()?,
        Err(_) => WireFormat::default(),
    };

    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    debug!("Connected to {}", url);

    println!("Welcome to the chat room!");
    println!("Type a message and press Enter to send. Ctrl-D to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    let text = normalize(&line);
                    if text.is_empty() {
                        continue;
                    }
                    if text.len() > MAX_MESSAGE_SIZE {
                        println!("* message too long ({} bytes, max {})", text.len(), MAX_MESSAGE_SIZE);
                        continue;
                    }
                    ws_sender.send(Frame::Text(text.clone().into())).await?;
                    println!("you: {}", text);
                }
                None => {
                    // stdin closed
                    let _ = ws_sender.close().await;
                    break;
                }
            },
            frame = ws_receiver.next() => match frame {
                Some(Ok(Frame::Text(text))) => render(&text, format),
                Some(Ok(Frame::Close(_))) | None => {
                    println!("* connection closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }

    Ok(())
}

/// Print every message in a (possibly coalesced) frame
fn render(frame: &str, format: WireFormat) {
    match format {
        WireFormat::Json => match decode_frame(frame) {
            Ok(messages) => {
                for message in messages {
                    println!("{}: {}", short_id(message.from()), message.text());
                }
            }
            Err(e) => warn!("Dropping undecodable frame: {}", e),
        },
        WireFormat::Text => {
            for line in frame.lines().filter(|line| !line.is_empty()) {
                println!("anonymous: {}", line);
            }
        }
    }
}

fn short_id(id: &ClientId) -> &str {
    id.as_str().get(..SENDER_PREFIX_LEN).unwrap_or(id.as_str())
}
