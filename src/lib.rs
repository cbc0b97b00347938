//! Single-Room WebSocket Chat Relay Library
//!
//! Peers connect over WebSocket and every text message one of them sends is
//! relayed to everyone else in the room, built with tokio-tungstenite
//! using the Actor pattern for state management.
//!
//! # Architecture
//! - `Room` is the single actor owning the membership set; `join`, `leave`
//!   and `broadcast` reach it as messages through a `RoomHandle`
//! - Each connection is a `Client` with a read loop and a write loop
//! - Fan-out never waits: a client whose mailbox is full is evicted
//! - Shutdown is a `CancellationToken` shared down to every client
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use chat_relay::{server, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let listener = TcpListener::bind(&config.bind_address).await?;
//!     server::serve(listener, config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod membership;
pub mod message;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::{Client, ClientTasks};
pub use config::{ClientConfig, Config, Environment};
pub use error::AppError;
pub use handler::handle_connection;
pub use membership::{FanOut, Member, Membership};
pub use message::{decode_frame, Message, WireFormat};
pub use room::{Room, RoomCommand, RoomHandle};
pub use types::ClientId;
